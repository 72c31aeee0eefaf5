use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChannelError, InterpreterParams};
use crate::abiencode::{
    self,
    types::{Address, Hash, U256},
    AbiType, AbiValue,
};

/// How the final state of an app is turned into free balance increments.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    TwoPartyFixedOutcome,
    SingleAssetTwoPartyCoinTransfer,
    MultiAssetMultiPartyCoinTransfer,
}

/// Solidity type strings of an app's state and, if it can be updated, its
/// actions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AbiEncodings {
    pub state_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_encoding: Option<String>,
}

impl AbiEncodings {
    pub fn state_type(&self) -> Result<AbiType, abiencode::Error> {
        self.state_encoding.parse()
    }

    pub fn action_type(&self) -> Result<Option<AbiType>, abiencode::Error> {
        self.action_encoding.as_deref().map(str::parse).transpose()
    }
}

/// The part of an app that the enforcement contract identifies it by.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    pub app_definition: Address,
    pub channel_nonce: u64,
    /// Slot addresses of both parties, sorted.
    pub participants: Vec<Address>,
    pub default_timeout: u64,
}

impl AppIdentity {
    pub fn to_abi_value(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::Address(self.app_definition),
            AbiValue::Uint(U256::from(self.channel_nonce)),
            AbiValue::Array(self.participants.iter().copied().map(AbiValue::Address).collect()),
            AbiValue::Uint(U256::from(self.default_timeout)),
        ])
    }

    /// `keccak256(abi.encode(identity))`
    pub fn identity_hash(&self) -> Hash {
        abiencode::to_hash(&self.to_abi_value())
    }

    /// Index of `signer` in the participant list.
    pub fn slot_of(&self, signer: &Address) -> Option<usize> {
        self.participants.iter().position(|p| p == signer)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppInstance {
    pub multisig_address: Address,
    pub identity: AppIdentity,
    pub identity_hash: Hash,
    pub abi_encodings: AbiEncodings,
    pub app_seq_no: u64,
    pub latest_state: Value,
    pub latest_version_number: u64,
    pub latest_timeout: u64,
    pub outcome_type: OutcomeType,
    /// `None` only for the free balance, which is never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_params: Option<InterpreterParams>,
}

impl AppInstance {
    pub fn app_definition(&self) -> Address {
        self.identity.app_definition
    }

    pub fn participants(&self) -> &[Address] {
        &self.identity.participants
    }

    /// Hash of the ABI encoding of the latest state under the app's state
    /// encoding.
    pub fn state_hash(&self) -> Result<Hash, abiencode::Error> {
        Self::hash_state(&self.abi_encodings, &self.latest_state)
    }

    pub fn hash_state(encodings: &AbiEncodings, state: &Value) -> Result<Hash, abiencode::Error> {
        abiencode::hash_json(&encodings.state_type()?, state)
    }

    /// Check that `action` is well formed for this app.
    pub fn encode_action(&self, action: &Value) -> Result<AbiValue, ChannelError> {
        let kind = self
            .abi_encodings
            .action_type()?
            .ok_or(ChannelError::NoActionEncoding(self.identity_hash))?;
        Ok(AbiValue::from_json(&kind, action)?)
    }

    /// The same app one version later.
    pub fn with_state(&self, state: Value, timeout: u64) -> Self {
        Self {
            latest_state: state,
            latest_version_number: self.latest_version_number + 1,
            latest_timeout: timeout,
            ..self.clone()
        }
    }
}
