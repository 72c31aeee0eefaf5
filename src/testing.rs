//! Shared fixtures for unit tests.

use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;

use crate::{
    app::{AppRegistry, CoinBalanceRefundApp, UnidirectionalTransferApp},
    channel::{AbiEncodings, AppIdentity, AppInstanceProposal, OutcomeType, StateChannel},
    commitment::get_create2_multisig_address,
    keys::{xkey_kth_address, ExtendedPrivateKey, ExtendedPublicKey},
    network::{NetworkContext, CONVENTION_FOR_ETH_TOKEN_ADDRESS, DEFAULT_FREE_BALANCE_TIMEOUT},
    Address, Hash, U256,
};

pub const TRANSFER_APP: Address = Address([0xa1; 20]);
pub const REFUND_APP: Address = Address([0xa2; 20]);

pub fn network() -> NetworkContext {
    NetworkContext {
        proxy_factory: Address([0xf0; 20]),
        multisig_mastercopy: Address([0xc0; 20]),
        proxy_bytecode: vec![0x60, 0x80, 0x60, 0x40, 0x52],
        free_balance_app: Address([0xfb; 20]),
        coin_balance_refund_app: Some(REFUND_APP),
        default_token_address: CONVENTION_FOR_ETH_TOKEN_ADDRESS,
        free_balance_timeout: DEFAULT_FREE_BALANCE_TIMEOUT,
    }
}

pub fn registry() -> AppRegistry {
    AppRegistry::new()
        .register(TRANSFER_APP, Arc::new(UnidirectionalTransferApp))
        .register(REFUND_APP, Arc::new(CoinBalanceRefundApp))
}

/// Alice and Bob with deterministic keys.
pub struct Fixture {
    pub alice: ExtendedPrivateKey,
    pub bob: ExtendedPrivateKey,
    pub network: NetworkContext,
    pub apps: Arc<AppRegistry>,
}

impl Fixture {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            alice: ExtendedPrivateKey::random(&mut rng),
            bob: ExtendedPrivateKey::random(&mut rng),
            network: network(),
            apps: Arc::new(registry()),
        }
    }

    pub fn alice_xpub(&self) -> ExtendedPublicKey {
        self.alice.neuter()
    }

    pub fn bob_xpub(&self) -> ExtendedPublicKey {
        self.bob.neuter()
    }

    pub fn alice_fb_address(&self) -> Address {
        xkey_kth_address(&self.alice_xpub(), 0).unwrap()
    }

    pub fn bob_fb_address(&self) -> Address {
        xkey_kth_address(&self.bob_xpub(), 0).unwrap()
    }

    pub fn multisig(&self) -> Address {
        get_create2_multisig_address(&[self.alice_xpub(), self.bob_xpub()], &self.network).unwrap()
    }

    pub fn channel(&self) -> StateChannel {
        StateChannel::setup(
            self.multisig(),
            [self.alice_xpub(), self.bob_xpub()],
            &self.network,
        )
        .unwrap()
    }

    pub fn funded_channel(&self, alice: u64, bob: u64) -> StateChannel {
        let token = self.network.default_token_address;
        let increments = [(
            token,
            [
                (self.alice_fb_address(), U256::from(alice)),
                (self.bob_fb_address(), U256::from(bob)),
            ]
            .into_iter()
            .collect(),
        )]
        .into_iter()
        .collect();
        self.channel().increment_free_balance(&increments).unwrap()
    }

    pub fn transfer_state(&self, alice: u64, bob: u64) -> serde_json::Value {
        json!({
            "transfers": [
                {"to": self.alice_fb_address(), "amount": U256::from(alice)},
                {"to": self.bob_fb_address(), "amount": U256::from(bob)}
            ],
            "turnNum": "0x0"
        })
    }

    /// Transfer app proposed by Alice to Bob as the next app of `channel`.
    pub fn payment_proposal(
        &self,
        channel: &StateChannel,
        alice_deposit: u64,
        bob_deposit: u64,
    ) -> AppInstanceProposal {
        let seq = channel.next_app_seq_no();
        let timeout = 100;
        let identity = AppIdentity {
            app_definition: TRANSFER_APP,
            channel_nonce: seq,
            participants: channel.get_signing_keys_for(seq).unwrap(),
            default_timeout: timeout,
        };
        let token = self.network.default_token_address;
        AppInstanceProposal {
            identity_hash: identity.identity_hash(),
            app_definition: TRANSFER_APP,
            abi_encodings: AbiEncodings {
                state_encoding: UnidirectionalTransferApp::STATE_ENCODING.into(),
                action_encoding: Some(UnidirectionalTransferApp::ACTION_ENCODING.into()),
            },
            initial_state: self.transfer_state(alice_deposit, bob_deposit),
            outcome_type: OutcomeType::SingleAssetTwoPartyCoinTransfer,
            initiator_deposit: U256::from(alice_deposit),
            initiator_deposit_token_address: token,
            responder_deposit: U256::from(bob_deposit),
            responder_deposit_token_address: token,
            timeout,
            proposed_by_identifier: self.alice_xpub(),
            proposed_to_identifier: self.bob_xpub(),
            app_seq_no: seq,
            disable_limit: false,
        }
    }

    pub fn refund_state(&self, threshold: u64) -> serde_json::Value {
        json!({
            "recipient": self.alice_fb_address(),
            "multisig": self.multisig(),
            "threshold": U256::from(threshold),
            "tokenAddress": self.network.default_token_address,
        })
    }

    /// Balance refund for Alice proposed by her as the next app of `channel`.
    pub fn refund_proposal(&self, channel: &StateChannel, threshold: u64) -> AppInstanceProposal {
        let seq = channel.next_app_seq_no();
        let timeout = CoinBalanceRefundApp::TIMEOUT;
        let identity = AppIdentity {
            app_definition: REFUND_APP,
            channel_nonce: seq,
            participants: channel.get_signing_keys_for(seq).unwrap(),
            default_timeout: timeout,
        };
        let token = self.network.default_token_address;
        AppInstanceProposal {
            identity_hash: identity.identity_hash(),
            app_definition: REFUND_APP,
            abi_encodings: AbiEncodings {
                state_encoding: CoinBalanceRefundApp::STATE_ENCODING.into(),
                action_encoding: None,
            },
            initial_state: self.refund_state(threshold),
            outcome_type: OutcomeType::SingleAssetTwoPartyCoinTransfer,
            initiator_deposit: U256::zero(),
            initiator_deposit_token_address: token,
            responder_deposit: U256::zero(),
            responder_deposit_token_address: token,
            timeout,
            proposed_by_identifier: self.alice_xpub(),
            proposed_to_identifier: self.bob_xpub(),
            app_seq_no: seq,
            disable_limit: true,
        }
    }

    /// Channel funded with 100 each and a transfer app installed.
    pub fn channel_with_installed_payment(&self, alice: u64, bob: u64) -> (StateChannel, Hash) {
        let channel = self.funded_channel(100, 100);
        let proposal = self.payment_proposal(&channel, alice, bob);
        let id = proposal.identity_hash;
        let channel = channel.add_proposal(proposal.clone()).unwrap();
        let decrements = channel.install_decrements(&proposal).unwrap();
        (channel.install_app(&id, &decrements).unwrap(), id)
    }
}
