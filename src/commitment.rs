//! Commitments: the artifacts the parties sign and the enforcement contract
//! accepts.

use serde::{Deserialize, Serialize};

use crate::{
    abiencode::{
        self, function_selector, keccak256_packed, to_fnargs_writer,
        types::{hex_bytes, Address, Hash, Signature, U256},
        AbiValue,
    },
    channel::{AppIdentity, AppInstance},
    keys::{xkeys_to_sorted_kth_addresses, ExtendedPublicKey, KeyError},
    network::NetworkContext,
    sig::{recover_signer, SignatureError},
};

pub const SET_STATE_SIGNATURE: &str =
    "setState((address,uint256,address[],uint256),(bytes32,uint256,uint256,bytes))";

#[derive(Debug, thiserror::Error)]
pub enum CommitmentError {
    #[error("missing signature")]
    MissingSignature,
    #[error("signature by {recovered}, expected {expected}")]
    SignatureMismatch { expected: Address, recovered: Address },
    #[error("unrecoverable signature: {0}")]
    Recovery(#[from] SignatureError),
    #[error("{0} is not a participant")]
    UnknownSigner(Address),
    #[error("{0} signed twice")]
    DuplicateSigner(Address),
    #[error("expected {expected} signatures, got {found}")]
    SignatureCount { expected: usize, found: usize },
}

/// Latest state of one app at one version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetStateCommitment {
    pub app_identity: AppIdentity,
    pub app_state_hash: Hash,
    pub version_number: u64,
    pub timeout: u64,
}

impl SetStateCommitment {
    pub fn new(
        app_identity: AppIdentity,
        app_state_hash: Hash,
        version_number: u64,
        timeout: u64,
    ) -> Self {
        Self {
            app_identity,
            app_state_hash,
            version_number,
            timeout,
        }
    }

    /// Commitment to the app's latest state.
    pub fn for_app(app: &AppInstance) -> Result<Self, abiencode::Error> {
        Ok(Self::new(
            app.identity.clone(),
            app.state_hash()?,
            app.latest_version_number,
            app.latest_timeout,
        ))
    }

    /// `keccak256(0x19 ‖ identityHash ‖ version ‖ timeout ‖ appStateHash)`,
    /// packed.
    pub fn hash_to_sign(&self) -> Hash {
        keccak256_packed(&[
            &[0x19],
            &self.app_identity.identity_hash().0,
            &U256::from(self.version_number).to_word(),
            &U256::from(self.timeout).to_word(),
            &self.app_state_hash.0,
        ])
    }

    /// Combine one signature per participant, ordered by participant slot.
    pub fn signed_transaction(
        &self,
        signatures: &[Signature],
    ) -> Result<SignedSetStateCommitment, CommitmentError> {
        let participants = &self.app_identity.participants;
        if signatures.len() != participants.len() {
            return Err(CommitmentError::SignatureCount {
                expected: participants.len(),
                found: signatures.len(),
            });
        }

        let hash = self.hash_to_sign();
        let mut ordered: Vec<Option<Signature>> = vec![None; participants.len()];
        for sig in signatures {
            let signer = recover_signer(hash, sig)?;
            let slot = self
                .app_identity
                .slot_of(&signer)
                .ok_or(CommitmentError::UnknownSigner(signer))?;
            if ordered[slot].replace(*sig).is_some() {
                return Err(CommitmentError::DuplicateSigner(signer));
            }
        }
        let signatures: Vec<Signature> = ordered.into_iter().flatten().collect();

        let mut data = function_selector(SET_STATE_SIGNATURE).to_vec();
        let packed_signatures: Vec<u8> = signatures.iter().flat_map(|s| s.0).collect();
        to_fnargs_writer(
            &[
                self.app_identity.to_abi_value(),
                AbiValue::Tuple(vec![
                    AbiValue::FixedBytes(self.app_state_hash.0.to_vec()),
                    AbiValue::Uint(U256::from(self.version_number)),
                    AbiValue::Uint(U256::from(self.timeout)),
                    AbiValue::Bytes(packed_signatures),
                ]),
            ],
            &mut data,
        );

        Ok(SignedSetStateCommitment {
            commitment: self.clone(),
            signatures,
            data,
        })
    }
}

/// A commitment with all signatures, ready to be submitted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedSetStateCommitment {
    pub commitment: SetStateCommitment,
    pub signatures: Vec<Signature>,
    /// `setState` calldata.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Fails unless `signature` over `commitment` was produced by `expected`.
pub fn assert_is_valid_signature(
    expected: Address,
    commitment: &SetStateCommitment,
    signature: Option<&Signature>,
) -> Result<(), CommitmentError> {
    let signature = signature.ok_or(CommitmentError::MissingSignature)?;
    let recovered = recover_signer(commitment.hash_to_sign(), signature)?;
    if recovered != expected {
        return Err(CommitmentError::SignatureMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}

/// `setup(address[])` calldata for the multisig with the given owners.
pub fn multisig_setup_data(owners: &[Address]) -> Vec<u8> {
    let mut data = function_selector("setup(address[])").to_vec();
    to_fnargs_writer(
        &[AbiValue::Array(owners.iter().copied().map(AbiValue::Address).collect())],
        &mut data,
    );
    data
}

/// Counterfactual address of the multisig owned by the slot-0 keys of
/// `owners`, deployed with CREATE2 through the proxy factory.
pub fn get_create2_multisig_address(
    owners: &[ExtendedPublicKey],
    network: &NetworkContext,
) -> Result<Address, KeyError> {
    let owner_addresses = xkeys_to_sorted_kth_addresses(owners, 0)?;
    let setup_data = multisig_setup_data(&owner_addresses);

    // solidityKeccak256(["bytes32", "uint256"], [keccak256(setup), nonce])
    let salt = keccak256_packed(&[&keccak256_packed(&[&setup_data]).0, &U256::zero().to_word()]);
    // solidityKeccak256(["bytes", "uint256"], [proxyBytecode, mastercopy])
    let init_code_hash = keccak256_packed(&[
        &network.proxy_bytecode,
        &network.multisig_mastercopy.to_word(),
    ]);
    let hash = keccak256_packed(&[&[0xff], &network.proxy_factory.0, &salt.0, &init_code_hash.0]);

    let mut address = Address::default();
    address.0.copy_from_slice(&hash.0[12..]);
    Ok(address)
}
