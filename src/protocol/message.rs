//! Wire envelope and protocol parameters.

use core::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ProtocolError;
use crate::{
    abiencode::types::{Address, Hash, Signature, U256},
    channel::{AbiEncodings, OutcomeType},
    keys::ExtendedPublicKey,
};

/// Sequence number of replies, which are correlated by process id instead.
pub const UNASSIGNED_SEQ_NO: i64 = -1;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    Propose,
    Install,
    TakeAction,
    Uninstall,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Propose => "propose",
            Protocol::Install => "install",
            Protocol::TakeAction => "takeAction",
            Protocol::Uninstall => "uninstall",
        })
    }
}

/// Refusal reason of a responder whose channel was held by another run.
pub const CHANNEL_BUSY: &str = "channel busy";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CustomData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    /// Set on a reply refusing the run. The initiator aborts on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CustomData {
    pub fn with_signature(signature: Signature) -> Self {
        Self {
            signature: Some(signature),
            ..Self::default()
        }
    }

    pub fn refusal(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub protocol: Protocol,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub seq: i64,
    pub to_xpub: ExtendedPublicKey,
    pub from_xpub: ExtendedPublicKey,
    pub params: Value,
    #[serde(default)]
    pub custom_data: CustomData,
}

impl ProtocolMessage {
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| ProtocolError::MalformedInput(format!("{} params: {}", self.protocol, e)))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProposeInstallParams {
    pub multisig_address: Address,
    pub initiator_xpub: ExtendedPublicKey,
    pub responder_xpub: ExtendedPublicKey,
    pub app_definition: Address,
    pub abi_encodings: AbiEncodings,
    pub initial_state: Value,
    pub outcome_type: OutcomeType,
    pub initiator_deposit: U256,
    /// The network's default token if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_deposit_token_address: Option<Address>,
    pub responder_deposit: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_deposit_token_address: Option<Address>,
    pub timeout: u64,
    /// Accepted only for balance refunds.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_limit: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstallParams {
    pub multisig_address: Address,
    pub initiator_xpub: ExtendedPublicKey,
    pub responder_xpub: ExtendedPublicKey,
    /// Id of the proposal to install.
    pub app_identity_hash: Hash,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TakeActionParams {
    pub multisig_address: Address,
    pub initiator_xpub: ExtendedPublicKey,
    pub responder_xpub: ExtendedPublicKey,
    pub app_identity_hash: Hash,
    pub action: Value,
    /// Version the action leads to. Filled in by the initiator, required by
    /// the responder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UninstallParams {
    pub multisig_address: Address,
    pub initiator_xpub: ExtendedPublicKey,
    pub responder_xpub: ExtendedPublicKey,
    pub app_identity_hash: Hash,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolParams {
    Propose(ProposeInstallParams),
    Install(InstallParams),
    TakeAction(TakeActionParams),
    Uninstall(UninstallParams),
}

impl ProtocolParams {
    pub fn from_message(message: &ProtocolMessage) -> Result<Self, ProtocolError> {
        Ok(match message.protocol {
            Protocol::Propose => ProtocolParams::Propose(message.params_as()?),
            Protocol::Install => ProtocolParams::Install(message.params_as()?),
            Protocol::TakeAction => ProtocolParams::TakeAction(message.params_as()?),
            Protocol::Uninstall => ProtocolParams::Uninstall(message.params_as()?),
        })
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolParams::Propose(_) => Protocol::Propose,
            ProtocolParams::Install(_) => Protocol::Install,
            ProtocolParams::TakeAction(_) => Protocol::TakeAction,
            ProtocolParams::Uninstall(_) => Protocol::Uninstall,
        }
    }

    pub fn multisig_address(&self) -> Address {
        match self {
            ProtocolParams::Propose(p) => p.multisig_address,
            ProtocolParams::Install(p) => p.multisig_address,
            ProtocolParams::TakeAction(p) => p.multisig_address,
            ProtocolParams::Uninstall(p) => p.multisig_address,
        }
    }

    pub fn initiator_xpub(&self) -> ExtendedPublicKey {
        match self {
            ProtocolParams::Propose(p) => p.initiator_xpub,
            ProtocolParams::Install(p) => p.initiator_xpub,
            ProtocolParams::TakeAction(p) => p.initiator_xpub,
            ProtocolParams::Uninstall(p) => p.initiator_xpub,
        }
    }

    pub fn responder_xpub(&self) -> ExtendedPublicKey {
        match self {
            ProtocolParams::Propose(p) => p.responder_xpub,
            ProtocolParams::Install(p) => p.responder_xpub,
            ProtocolParams::TakeAction(p) => p.responder_xpub,
            ProtocolParams::Uninstall(p) => p.responder_xpub,
        }
    }

    /// The app the run is about, if it already has an id.
    pub fn app_identity_hash(&self) -> Option<Hash> {
        match self {
            ProtocolParams::Propose(_) => None,
            ProtocolParams::Install(p) => Some(p.app_identity_hash),
            ProtocolParams::TakeAction(p) => Some(p.app_identity_hash),
            ProtocolParams::Uninstall(p) => Some(p.app_identity_hash),
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            ProtocolParams::Propose(p) => serde_json::to_value(p),
            ProtocolParams::Install(p) => serde_json::to_value(p),
            ProtocolParams::TakeAction(p) => serde_json::to_value(p),
            ProtocolParams::Uninstall(p) => serde_json::to_value(p),
        };
        value.map_err(|e| ProtocolError::MalformedInput(e.to_string()))
    }
}
