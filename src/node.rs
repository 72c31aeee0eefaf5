//! A channel node: protocol runner, store, transport and chain provider
//! behind typed methods and a [Router].
//!
//! Every state changing method validates its request, takes the locks of the
//! channel (and app) it touches, runs the protocol, releases the locks and
//! emits a [NodeEvent].
//!
//! Incoming runs are served concurrently. When both parties start a run on
//! the same channel at once, the party with the lower public identifier has
//! priority: as responder it refuses a run it cannot lock right away, while
//! the other party waits for its own run to end.

mod config;
mod events;
mod lock;
mod methods;
mod router;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::{
    abiencode::types::{Address, Hash, U256},
    app::AppRegistry,
    chain::{ChainError, ChainProvider, DeployError, RetryError},
    channel::{ChannelError, StateChannel},
    keys::{ExtendedPrivateKey, ExtendedPublicKey, KeyError},
    protocol::{
        ChannelMap, Protocol, ProtocolError, ProtocolMessage, ProtocolParams, ProtocolRunner,
        CHANNEL_BUSY,
    },
    store::{Store, StoreError, StoreService},
    transport::Transport,
};

pub use config::{ConfigError, NodeConfig};
pub use events::NodeEvent;
pub use lock::{LockGuard, LockService};
pub use methods::{
    AppInstanceRequest, CreateChannelRequest, CreateChannelResult, DeployRequest, DeployResult,
    DepositRequest, DepositResult, FreeBalanceRequest, InstallResult, ProposeInstallRequest,
    ProposeInstallResult, TakeActionRequest, TakeActionResult, TokenIndexedFreeBalanceRequest,
    UninstallResult,
};
pub use router::{Handler, Router};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("no channel with multisig {0}")]
    NoSuchChannel(Address),
    #[error("no channel holds app {0}")]
    NoSuchApp(Hash),
    #[error("{address} has {available} of token {token}, needs {required}")]
    InsufficientFunds {
        address: Address,
        token: Address,
        available: U256,
        required: U256,
    },
    #[error("no chain provider configured")]
    NoChainProvider,
    #[error("channel {0} is busy with another protocol run")]
    Busy(Address),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("deposit failed: {0}")]
    DepositFailed(RetryError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub struct Node {
    config: NodeConfig,
    public_identifier: ExtendedPublicKey,
    store: Store,
    runner: ProtocolRunner,
    provider: Option<Arc<dyn ChainProvider>>,
    locks: LockService,
    events: broadcast::Sender<NodeEvent>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        keys: ExtendedPrivateKey,
        apps: Arc<AppRegistry>,
        store_service: Arc<dyn StoreService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let store = Store::new(store_service, config.store_key_prefix.clone());
        let runner = ProtocolRunner::new(
            config.network.clone(),
            apps,
            store.clone(),
            transport,
            keys,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            public_identifier: runner.public_identifier(),
            config,
            store,
            runner,
            provider: None,
            locks: LockService::new(),
            events,
        }
    }

    pub fn with_chain_provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        self.runner = self.runner.with_chain_provider(provider.clone());
        self.provider = Some(provider);
        self
    }

    pub fn public_identifier(&self) -> ExtendedPublicKey {
        self.public_identifier
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    async fn lock(&self, multisig: &Address, app: Option<&Hash>) -> LockGuard {
        self.locks.acquire(lock_names(multisig, app)).await
    }

    async fn working_set(&self, multisig: &Address) -> Result<ChannelMap, NodeError> {
        let mut channels = ChannelMap::new();
        if let Some(channel) = self.store.get_state_channel(multisig).await? {
            channels.insert(*multisig, channel);
        }
        Ok(channels)
    }

    async fn channel(&self, multisig: &Address) -> Result<StateChannel, NodeError> {
        self.store
            .get_state_channel(multisig)
            .await?
            .ok_or(NodeError::NoSuchChannel(*multisig))
    }

    async fn channel_of_app(&self, app: &Hash) -> Result<StateChannel, NodeError> {
        self.store
            .get_channel_from_app_instance_id(app)
            .await?
            .ok_or(NodeError::NoSuchApp(*app))
    }

    fn counterparty(&self, channel: &StateChannel) -> Result<ExtendedPublicKey, NodeError> {
        channel
            .counterparty_of(&self.public_identifier)
            .copied()
            .ok_or_else(|| {
                NodeError::InvalidRequest(format!(
                    "not a party of channel {}",
                    channel.multisig_address()
                ))
            })
    }

    /// Run `params` as initiator under the channel (and app) lock and emit the
    /// matching event. Returns the channel after the run.
    async fn initiate(&self, params: ProtocolParams) -> Result<StateChannel, NodeError> {
        let multisig = params.multisig_address();
        let guard = self.lock(&multisig, params.app_identity_hash().as_ref()).await;
        let channels = self.working_set(&multisig).await?;
        let mut channels = self.runner.initiate_protocol(params.clone(), channels).await?;
        let channel = channels
            .remove(&multisig)
            .ok_or(NodeError::NoSuchChannel(multisig))?;
        drop(guard);
        if let Some(event) = protocol_event(&params, &channel) {
            self.emit(event);
        }
        Ok(channel)
    }

    /// Respond to a message opening a protocol run.
    pub async fn handle_protocol_message(&self, message: ProtocolMessage) -> Result<(), NodeError> {
        let params = ProtocolParams::from_message(&message)?;
        let multisig = params.multisig_address();
        let process_id = message.process_id.clone();
        debug!(protocol = %message.protocol, %process_id, "incoming protocol run");

        let names = lock_names(&multisig, params.app_identity_hash().as_ref());
        // Install notifications are final for their initiator and never refused.
        let priority =
            message.protocol != Protocol::Install && self.public_identifier < message.from_xpub;
        let guard = if priority {
            match self.locks.try_acquire(names) {
                Some(guard) => guard,
                None => {
                    debug!(%process_id, %multisig, "channel busy, refusing run");
                    self.runner.refuse(&message, CHANNEL_BUSY).await?;
                    return Err(NodeError::Busy(multisig));
                }
            }
        } else {
            self.locks.acquire(names).await
        };
        let channels = self.working_set(&multisig).await?;
        // Kept to refuse with, so the initiator does not wait for a reply
        // that never comes.
        let opener = (message.protocol != Protocol::Install).then(|| message.clone());
        let result = self.runner.run_protocol_with_message(message, channels).await;
        drop(guard);
        let mut channels = match (result, opener) {
            (Ok(channels), _) => channels,
            (Err(e), Some(opener)) => {
                if let Err(refusal) = self.runner.refuse(&opener, &e.to_string()).await {
                    debug!(%process_id, "could not refuse run: {}", refusal);
                }
                return Err(e.into());
            }
            (Err(e), None) => return Err(e.into()),
        };

        if let Some(channel) = channels.remove(&multisig) {
            if let Some(event) = protocol_event(&params, &channel) {
                self.emit(event);
            }
        }
        Ok(())
    }

    /// Serve incoming protocol runs until the inbox closes, each in its own
    /// task.
    pub async fn run_inbox(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<ProtocolMessage>) {
        while let Some(message) = inbox.recv().await {
            let node = self.clone();
            tokio::spawn(async move {
                let process_id = message.process_id.clone();
                if let Err(e) = node.handle_protocol_message(message).await {
                    warn!(%process_id, "protocol run failed: {}", e);
                }
            });
        }
    }
}

fn lock_names(multisig: &Address, app: Option<&Hash>) -> Vec<String> {
    let mut names = vec![multisig.to_string()];
    names.extend(app.map(Hash::to_string));
    names
}

fn protocol_event(params: &ProtocolParams, channel: &StateChannel) -> Option<NodeEvent> {
    let multisig_address = channel.multisig_address();
    let from = params.initiator_xpub();
    match params {
        ProtocolParams::Propose(_) => {
            let seq = channel.num_proposed_apps();
            channel
                .proposed_app_instances()
                .values()
                .find(|p| p.app_seq_no == seq)
                .map(|p| NodeEvent::ProposeInstall {
                    multisig_address,
                    app_identity_hash: p.identity_hash,
                    from,
                })
        }
        ProtocolParams::Install(p) => Some(NodeEvent::Install {
            multisig_address,
            app_identity_hash: p.app_identity_hash,
            from,
        }),
        ProtocolParams::TakeAction(p) => {
            channel
                .get_app_instance(&p.app_identity_hash)
                .ok()
                .map(|app| NodeEvent::UpdateState {
                    multisig_address,
                    app_identity_hash: p.app_identity_hash,
                    new_state: app.latest_state.clone(),
                    version_number: app.latest_version_number,
                    from,
                })
        }
        ProtocolParams::Uninstall(p) => Some(NodeEvent::Uninstall {
            multisig_address,
            app_identity_hash: p.app_identity_hash,
            from,
        }),
    }
}
