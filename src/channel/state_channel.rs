use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    AbiEncodings, AppIdentity, AppInstance, AppInstanceProposal, ChannelError, FreeBalance,
    InterpreterParams, OutcomeType, TokenIndexedBalances, FREE_BALANCE_STATE_ENCODING,
};
use crate::{
    abiencode::types::{Address, Hash},
    keys::{xkey_kth_address, xkeys_to_sorted_kth_addresses, ExtendedPublicKey},
    network::NetworkContext,
};

/// A channel between exactly two parties.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateChannel {
    multisig_address: Address,
    proxy_factory_address: Address,
    user_neutered_extended_keys: [ExtendedPublicKey; 2],
    app_instances: BTreeMap<Hash, AppInstance>,
    proposed_app_instances: BTreeMap<Hash, AppInstanceProposal>,
    free_balance: Option<AppInstance>,
    num_proposed_apps: u64,
}

impl StateChannel {
    pub fn create_empty(
        multisig_address: Address,
        proxy_factory_address: Address,
        mut user_neutered_extended_keys: [ExtendedPublicKey; 2],
    ) -> Self {
        // Both parties must end up with the same record.
        user_neutered_extended_keys.sort();
        Self {
            multisig_address,
            proxy_factory_address,
            user_neutered_extended_keys,
            app_instances: BTreeMap::new(),
            proposed_app_instances: BTreeMap::new(),
            free_balance: None,
            num_proposed_apps: 0,
        }
    }

    /// An empty channel with a free balance holding zero of the default
    /// token for both owners.
    pub fn setup(
        multisig_address: Address,
        user_neutered_extended_keys: [ExtendedPublicKey; 2],
        network: &NetworkContext,
    ) -> Result<Self, ChannelError> {
        let mut channel = Self::create_empty(
            multisig_address,
            network.proxy_factory,
            user_neutered_extended_keys,
        );
        let owners = channel.multisig_owners()?;
        let state = FreeBalance::new(&owners, network.default_token_address).to_json()?;
        let identity = AppIdentity {
            app_definition: network.free_balance_app,
            channel_nonce: 0,
            participants: owners,
            default_timeout: network.free_balance_timeout,
        };
        channel.free_balance = Some(AppInstance {
            multisig_address,
            identity_hash: identity.identity_hash(),
            identity,
            abi_encodings: AbiEncodings {
                state_encoding: FREE_BALANCE_STATE_ENCODING.to_string(),
                action_encoding: None,
            },
            app_seq_no: 0,
            latest_state: state,
            latest_version_number: 0,
            latest_timeout: network.free_balance_timeout,
            outcome_type: OutcomeType::MultiAssetMultiPartyCoinTransfer,
            interpreter_params: None,
        });
        Ok(channel)
    }

    pub fn multisig_address(&self) -> Address {
        self.multisig_address
    }

    pub fn proxy_factory_address(&self) -> Address {
        self.proxy_factory_address
    }

    pub fn user_neutered_extended_keys(&self) -> &[ExtendedPublicKey; 2] {
        &self.user_neutered_extended_keys
    }

    pub fn num_proposed_apps(&self) -> u64 {
        self.num_proposed_apps
    }

    pub fn app_instances(&self) -> &BTreeMap<Hash, AppInstance> {
        &self.app_instances
    }

    pub fn proposed_app_instances(&self) -> &BTreeMap<Hash, AppInstanceProposal> {
        &self.proposed_app_instances
    }

    /// The other party's key, if `me` is a party of this channel.
    pub fn counterparty_of(&self, me: &ExtendedPublicKey) -> Option<&ExtendedPublicKey> {
        match &self.user_neutered_extended_keys {
            [a, b] if a == me => Some(b),
            [a, b] if b == me => Some(a),
            _ => None,
        }
    }

    /// Sorted addresses of both parties' `n`-th keys.
    pub fn get_signing_keys_for(&self, n: u64) -> Result<Vec<Address>, ChannelError> {
        Ok(xkeys_to_sorted_kth_addresses(
            &self.user_neutered_extended_keys,
            n,
        )?)
    }

    pub fn multisig_owners(&self) -> Result<Vec<Address>, ChannelError> {
        self.get_signing_keys_for(0)
    }

    pub fn free_balance(&self) -> Result<&AppInstance, ChannelError> {
        self.free_balance
            .as_ref()
            .ok_or(ChannelError::FreeBalanceMissing(self.multisig_address))
    }

    pub fn get_free_balance_state(&self) -> Result<FreeBalance, ChannelError> {
        FreeBalance::from_json(&self.free_balance()?.latest_state)
    }

    pub fn is_free_balance(&self, id: &Hash) -> bool {
        self.free_balance
            .as_ref()
            .map_or(false, |fb| fb.identity_hash == *id)
    }

    pub fn has_app_instance(&self, id: &Hash) -> bool {
        self.app_instances.contains_key(id)
    }

    pub fn get_app_instance(&self, id: &Hash) -> Result<&AppInstance, ChannelError> {
        self.app_instances
            .get(id)
            .ok_or(ChannelError::NoSuchApp(*id))
    }

    pub fn get_proposal(&self, id: &Hash) -> Result<&AppInstanceProposal, ChannelError> {
        self.proposed_app_instances
            .get(id)
            .ok_or(ChannelError::NoSuchProposal(*id))
    }

    /// Sequence number the next proposal must carry.
    pub fn next_app_seq_no(&self) -> u64 {
        self.num_proposed_apps + 1
    }

    pub fn add_proposal(&self, proposal: AppInstanceProposal) -> Result<Self, ChannelError> {
        if proposal.app_seq_no != self.next_app_seq_no() {
            return Err(ChannelError::SequenceMismatch {
                expected: self.next_app_seq_no(),
                found: proposal.app_seq_no,
            });
        }
        proposal.check_deposit_tokens()?;
        let mut next = self.clone();
        next.proposed_app_instances
            .insert(proposal.identity_hash, proposal);
        next.num_proposed_apps += 1;
        Ok(next)
    }

    pub fn remove_proposal(&self, id: &Hash) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        next.proposed_app_instances
            .remove(id)
            .ok_or(ChannelError::NoSuchProposal(*id))?;
        Ok(next)
    }

    /// What installing `proposal` takes out of each party's free balance.
    pub fn install_decrements(
        &self,
        proposal: &AppInstanceProposal,
    ) -> Result<TokenIndexedBalances, ChannelError> {
        let initiator = xkey_kth_address(&proposal.proposed_by_identifier, 0)?;
        let responder = xkey_kth_address(&proposal.proposed_to_identifier, 0)?;
        let mut decrements = TokenIndexedBalances::new();
        for (token, address, amount) in [
            (
                proposal.initiator_deposit_token_address,
                initiator,
                proposal.initiator_deposit,
            ),
            (
                proposal.responder_deposit_token_address,
                responder,
                proposal.responder_deposit,
            ),
        ] {
            let entry = decrements.entry(token).or_default().entry(address).or_default();
            *entry = entry
                .checked_add(amount)
                .ok_or(ChannelError::Overflow { token, address })?;
        }
        Ok(decrements)
    }

    /// Turn the proposal into an installed app funded by `decrements`.
    pub fn install_app(
        &self,
        proposal_id: &Hash,
        decrements: &TokenIndexedBalances,
    ) -> Result<Self, ChannelError> {
        let proposal = self.get_proposal(proposal_id)?;

        let identity = AppIdentity {
            app_definition: proposal.app_definition,
            channel_nonce: proposal.app_seq_no,
            participants: self.get_signing_keys_for(proposal.app_seq_no)?,
            default_timeout: proposal.timeout,
        };
        let identity_hash = identity.identity_hash();
        if identity_hash != *proposal_id {
            return Err(ChannelError::IdentityMismatch {
                expected: *proposal_id,
                found: identity_hash,
            });
        }

        let players = [
            xkey_kth_address(&proposal.proposed_by_identifier, 0)?,
            xkey_kth_address(&proposal.proposed_to_identifier, 0)?,
        ];
        let app = AppInstance {
            multisig_address: self.multisig_address,
            identity,
            identity_hash,
            abi_encodings: proposal.abi_encodings.clone(),
            app_seq_no: proposal.app_seq_no,
            latest_state: proposal.initial_state.clone(),
            latest_version_number: 0,
            latest_timeout: proposal.timeout,
            outcome_type: proposal.outcome_type,
            interpreter_params: Some(InterpreterParams::for_proposal(proposal, players)?),
        };

        let free_balance = self
            .get_free_balance_state()?
            .decrement(decrements)?
            .add_active_app(identity_hash);

        let mut next = self.with_free_balance(&free_balance)?;
        next.proposed_app_instances.remove(proposal_id);
        next.app_instances.insert(identity_hash, app);
        Ok(next)
    }

    /// Replace the state of an installed app, one version up.
    pub fn set_state(&self, app_id: &Hash, state: Value, timeout: u64) -> Result<Self, ChannelError> {
        let app = self.get_app_instance(app_id)?.with_state(state, timeout);
        let mut next = self.clone();
        next.app_instances.insert(*app_id, app);
        Ok(next)
    }

    pub fn uninstall_app(
        &self,
        app_id: &Hash,
        increments: &TokenIndexedBalances,
    ) -> Result<Self, ChannelError> {
        if self.is_free_balance(app_id) {
            return Err(ChannelError::CannotUninstallFreeBalance);
        }
        self.get_app_instance(app_id)?;

        let free_balance = self
            .get_free_balance_state()?
            .remove_active_app(app_id)?
            .increment(increments)?;

        let mut next = self.with_free_balance(&free_balance)?;
        next.app_instances.remove(app_id);
        Ok(next)
    }

    /// Credit the free balance outside of any app, e.g. to restore a channel
    /// known to be funded.
    pub fn increment_free_balance(
        &self,
        increments: &TokenIndexedBalances,
    ) -> Result<Self, ChannelError> {
        let free_balance = self.get_free_balance_state()?.increment(increments)?;
        self.with_free_balance(&free_balance)
    }

    fn with_free_balance(&self, free_balance: &FreeBalance) -> Result<Self, ChannelError> {
        let current = self.free_balance()?;
        let updated = current.with_state(free_balance.to_json()?, current.latest_timeout);
        let mut next = self.clone();
        next.free_balance = Some(updated);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing, U256};

    #[test]
    fn setup_has_zero_free_balance_at_slot_zero() {
        let fx = testing::Fixture::new(0);
        let channel = fx.channel();
        let fb = channel.free_balance().unwrap();
        assert_eq!(fb.app_seq_no, 0);
        assert_eq!(fb.latest_version_number, 0);
        assert_eq!(fb.participants(), channel.multisig_owners().unwrap().as_slice());

        let state = channel.get_free_balance_state().unwrap();
        let token = fx.network.default_token_address;
        for owner in channel.multisig_owners().unwrap() {
            assert_eq!(state.balance_of(&token, &owner), U256::zero());
        }
    }

    #[test]
    fn proposal_sequence_numbers_are_gapless() {
        let fx = testing::Fixture::new(1);
        let channel = fx.channel();
        let first = fx.payment_proposal(&channel, 0, 0);
        let channel = channel.add_proposal(first.clone()).unwrap();
        assert_eq!(channel.num_proposed_apps(), 1);

        // Reusing the number is refused.
        assert_eq!(
            channel.add_proposal(first.clone()),
            Err(ChannelError::SequenceMismatch {
                expected: 2,
                found: 1
            })
        );

        // Removing does not give the number back.
        let channel = channel.remove_proposal(&first.identity_hash).unwrap();
        assert_eq!(channel.next_app_seq_no(), 2);
        assert!(channel.remove_proposal(&first.identity_hash).is_err());
    }

    #[test]
    fn install_moves_deposits_out_of_free_balance() {
        let fx = testing::Fixture::new(2);
        let channel = fx.funded_channel(100, 50);
        let proposal = fx.payment_proposal(&channel, 30, 20);
        let id = proposal.identity_hash;
        let channel = channel.add_proposal(proposal.clone()).unwrap();
        let decrements = channel.install_decrements(&proposal).unwrap();
        let installed = channel.install_app(&id, &decrements).unwrap();

        assert!(installed.has_app_instance(&id));
        assert!(installed.get_proposal(&id).is_err());
        let fb = installed.get_free_balance_state().unwrap();
        let token = fx.network.default_token_address;
        assert_eq!(fb.balance_of(&token, &fx.alice_fb_address()), U256::from(70));
        assert_eq!(fb.balance_of(&token, &fx.bob_fb_address()), U256::from(30));
        assert_eq!(fb.active_apps(), &[id]);
        assert_eq!(
            installed.free_balance().unwrap().latest_version_number,
            channel.free_balance().unwrap().latest_version_number + 1
        );

        let app = installed.get_app_instance(&id).unwrap();
        assert_eq!(app.participants(), installed.get_signing_keys_for(1).unwrap().as_slice());
    }

    #[test]
    fn install_without_funds_fails() {
        let fx = testing::Fixture::new(3);
        let channel = fx.funded_channel(10, 0);
        let proposal = fx.payment_proposal(&channel, 30, 0);
        let channel = channel.add_proposal(proposal.clone()).unwrap();
        let decrements = channel.install_decrements(&proposal).unwrap();
        assert!(matches!(
            channel.install_app(&proposal.identity_hash, &decrements),
            Err(ChannelError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn set_state_only_touches_one_app() {
        let fx = testing::Fixture::new(4);
        let (channel, id) = fx.channel_with_installed_payment(10, 10);
        let before = channel.free_balance().unwrap().clone();
        let next = channel.set_state(&id, serde_json::json!({"x": 1}), 5).unwrap();
        let app = next.get_app_instance(&id).unwrap();
        assert_eq!(app.latest_version_number, 1);
        assert_eq!(app.latest_timeout, 5);
        assert_eq!(next.free_balance().unwrap(), &before);
        assert!(channel.set_state(&Hash([1; 32]), Value::Null, 5).is_err());
    }

    #[test]
    fn free_balance_cannot_be_uninstalled() {
        let fx = testing::Fixture::new(5);
        let channel = fx.channel();
        let fb_id = channel.free_balance().unwrap().identity_hash;
        assert_eq!(
            channel.uninstall_app(&fb_id, &TokenIndexedBalances::new()),
            Err(ChannelError::CannotUninstallFreeBalance)
        );
    }

    #[test]
    fn uninstall_returns_value() {
        let fx = testing::Fixture::new(6);
        let (channel, id) = fx.channel_with_installed_payment(10, 5);
        let token = fx.network.default_token_address;
        let increments: TokenIndexedBalances = [(
            token,
            [
                (fx.alice_fb_address(), U256::from(12)),
                (fx.bob_fb_address(), U256::from(3)),
            ]
            .into_iter()
            .collect(),
        )]
        .into_iter()
        .collect();
        let after = channel.uninstall_app(&id, &increments).unwrap();
        assert!(!after.has_app_instance(&id));
        let fb = after.get_free_balance_state().unwrap();
        assert!(fb.active_apps().is_empty());
        let total = fb.balance_of(&token, &fx.alice_fb_address())
            + fb.balance_of(&token, &fx.bob_fb_address());
        assert_eq!(total, U256::from(100 + 100));
    }

    #[test]
    fn serde_roundtrip() {
        let fx = testing::Fixture::new(7);
        let (channel, _) = fx.channel_with_installed_payment(1, 2);
        let json = serde_json::to_value(&channel).unwrap();
        let back: StateChannel = serde_json::from_value(json).unwrap();
        assert_eq!(back, channel);
    }
}
