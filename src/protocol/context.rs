use std::{collections::BTreeMap, sync::Arc};

use super::{ProtocolError, ProtocolMessage};
use crate::{
    abiencode::types::Address,
    app::{AppRegistry, ObservedBalances},
    channel::StateChannel,
    network::NetworkContext,
};

/// Channels a protocol run may read, keyed by multisig address.
pub type ChannelMap = BTreeMap<Address, StateChannel>;

/// Everything a flow is computed from.
#[derive(Debug, Clone)]
pub struct Context {
    /// For the initiator the locally built message, for the responder the
    /// one received.
    pub message: ProtocolMessage,
    pub channels: ChannelMap,
    pub network: NetworkContext,
    pub apps: Arc<AppRegistry>,
    /// Chain balances read before an uninstall, empty otherwise.
    pub observed_balances: ObservedBalances,
}

impl Context {
    pub fn channel(&self, multisig: &Address) -> Result<&StateChannel, ProtocolError> {
        self.channels
            .get(multisig)
            .ok_or(ProtocolError::NoSuchChannel(*multisig))
    }
}
