use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    abiencode::types::{Address, Hash},
    keys::ExtendedPublicKey,
};

/// What a node tells its subscribers. `from` is the party that started the
/// protocol run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeEvent {
    #[serde(rename_all = "camelCase")]
    ChannelCreated {
        multisig_address: Address,
        owners: [ExtendedPublicKey; 2],
    },
    #[serde(rename_all = "camelCase")]
    ProposeInstall {
        multisig_address: Address,
        app_identity_hash: Hash,
        from: ExtendedPublicKey,
    },
    #[serde(rename_all = "camelCase")]
    RejectInstall {
        multisig_address: Address,
        app_identity_hash: Hash,
    },
    #[serde(rename_all = "camelCase")]
    Install {
        multisig_address: Address,
        app_identity_hash: Hash,
        from: ExtendedPublicKey,
    },
    #[serde(rename_all = "camelCase")]
    UpdateState {
        multisig_address: Address,
        app_identity_hash: Hash,
        new_state: Value,
        version_number: u64,
        from: ExtendedPublicKey,
    },
    #[serde(rename_all = "camelCase")]
    Uninstall {
        multisig_address: Address,
        app_identity_hash: Hash,
        from: ExtendedPublicKey,
    },
    #[serde(rename_all = "camelCase")]
    DepositConfirmed {
        multisig_address: Address,
        request_id: String,
        transaction_hash: Hash,
    },
    #[serde(rename_all = "camelCase")]
    DepositFailed {
        multisig_address: Address,
        request_id: String,
        error: String,
    },
}
