use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    flow_for, ChannelMap, Context, CustomData, Opcode, Protocol, ProtocolError, ProtocolMessage,
    ProtocolParams, Resume, Role, Step, UninstallParams, CHANNEL_BUSY, UNASSIGNED_SEQ_NO,
};
use crate::{
    app::{AppRegistry, ObservedBalances},
    chain::ChainProvider,
    keys::{ExtendedPrivateKey, ExtendedPublicKey},
    network::NetworkContext,
    store::Store,
    transport::Transport,
};

/// Executes protocol flows for one party.
///
/// The runner owns the key material: flows only ever see public keys and ask
/// for signatures by key index.
pub struct ProtocolRunner {
    network: NetworkContext,
    apps: Arc<AppRegistry>,
    store: Store,
    transport: Arc<dyn Transport>,
    keys: ExtendedPrivateKey,
    public_identifier: ExtendedPublicKey,
    provider: Option<Arc<dyn ChainProvider>>,
}

impl ProtocolRunner {
    pub fn new(
        network: NetworkContext,
        apps: Arc<AppRegistry>,
        store: Store,
        transport: Arc<dyn Transport>,
        keys: ExtendedPrivateKey,
    ) -> Self {
        let public_identifier = keys.neuter();
        Self {
            network,
            apps,
            store,
            transport,
            keys,
            public_identifier,
            provider: None,
        }
    }

    /// Read outcomes that depend on the chain through `provider`.
    pub fn with_chain_provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn public_identifier(&self) -> ExtendedPublicKey {
        self.public_identifier
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// Run `params` as initiator. Returns `channels` with the updated channel.
    pub async fn initiate_protocol(
        &self,
        params: ProtocolParams,
        channels: ChannelMap,
    ) -> Result<ChannelMap, ProtocolError> {
        if params.initiator_xpub() != self.public_identifier {
            return Err(ProtocolError::MalformedInput(
                "this node is not the initiator".into(),
            ));
        }
        let message = ProtocolMessage {
            protocol: params.protocol(),
            process_id: Uuid::new_v4().to_string(),
            seq: 0,
            to_xpub: params.responder_xpub(),
            from_xpub: self.public_identifier,
            params: params.to_value()?,
            custom_data: CustomData::default(),
        };
        self.run(Role::Initiator, message, channels).await
    }

    /// Respond to a message opening a run.
    pub async fn run_protocol_with_message(
        &self,
        message: ProtocolMessage,
        channels: ChannelMap,
    ) -> Result<ChannelMap, ProtocolError> {
        if message.seq != 1 {
            return Err(ProtocolError::MalformedInput(format!(
                "seq {} does not open a protocol run",
                message.seq
            )));
        }
        if message.to_xpub != self.public_identifier {
            return Err(ProtocolError::MalformedInput(format!(
                "message is addressed to {}",
                message.to_xpub
            )));
        }
        let params = ProtocolParams::from_message(&message)?;
        if params.responder_xpub() != self.public_identifier
            || params.initiator_xpub() != message.from_xpub
        {
            return Err(ProtocolError::MalformedInput(
                "parameters do not name the sender and this node".into(),
            ));
        }
        self.run(Role::Responder, message, channels).await
    }

    /// Answer an opener with a refusal so its initiator stops waiting.
    pub async fn refuse(
        &self,
        message: &ProtocolMessage,
        reason: &str,
    ) -> Result<(), ProtocolError> {
        let reply = ProtocolMessage {
            protocol: message.protocol,
            process_id: message.process_id.clone(),
            seq: UNASSIGNED_SEQ_NO,
            to_xpub: message.from_xpub,
            from_xpub: self.public_identifier,
            params: message.params.clone(),
            custom_data: CustomData::refusal(reason),
        };
        self.transport.send(&message.from_xpub, reply).await?;
        Ok(())
    }

    /// Balances the outcome of the app being uninstalled depends on.
    async fn observe_chain(
        &self,
        message: &ProtocolMessage,
        channels: &ChannelMap,
    ) -> Result<ObservedBalances, ProtocolError> {
        let mut observed = ObservedBalances::new();
        if message.protocol != Protocol::Uninstall {
            return Ok(observed);
        }
        let params: UninstallParams = message.params_as()?;
        // A missing app is reported by the flow.
        let Some(app) = channels
            .get(&params.multisig_address)
            .and_then(|channel| channel.get_app_instance(&params.app_identity_hash).ok())
        else {
            return Ok(observed);
        };
        let queries = self.apps.balance_queries(app)?;
        if queries.is_empty() {
            return Ok(observed);
        }
        let provider = self.provider.as_deref().ok_or(ProtocolError::NoChainProvider)?;
        for query in queries {
            let balance = provider.get_balance(query.holder, query.token).await?;
            debug!(holder = %query.holder, token = %query.token, %balance, "observed balance");
            observed.insert(query, balance);
        }
        Ok(observed)
    }

    async fn run(
        &self,
        role: Role,
        message: ProtocolMessage,
        channels: ChannelMap,
    ) -> Result<ChannelMap, ProtocolError> {
        let process_id = message.process_id.clone();
        let result = self.drive(role, message, channels).await;
        self.transport.forget(&process_id);
        result
    }

    async fn drive(
        &self,
        role: Role,
        message: ProtocolMessage,
        mut channels: ChannelMap,
    ) -> Result<ChannelMap, ProtocolError> {
        let protocol = message.protocol;
        let process_id = message.process_id.clone();
        debug!(%protocol, %process_id, ?role, "starting protocol run");

        let observed_balances = self
            .observe_chain(&message, &channels)
            .await
            .map_err(|e| {
                warn!(%protocol, %process_id, ?role, "cannot read the chain: {}", e);
                e
            })?;
        let ctx = Context {
            message,
            channels: channels.clone(),
            network: self.network.clone(),
            apps: self.apps.clone(),
            observed_balances,
        };
        let mut flow = flow_for(protocol, role, &ctx).map_err(|e| {
            warn!(%protocol, %process_id, ?role, "refused: {}", e);
            e
        })?;

        let mut input = Resume::Start;
        loop {
            let op = match flow.resume(input) {
                Ok(Step::Yield(op)) => op,
                Ok(Step::Commit(channel)) => {
                    info!(%protocol, %process_id, ?role, "protocol run committed");
                    channels.insert(channel.multisig_address(), channel);
                    return Ok(channels);
                }
                Err(e) => {
                    warn!(%protocol, %process_id, ?role, "aborted: {}", e);
                    return Err(e);
                }
            };
            input = self.execute(op, &process_id).await.map_err(|e| {
                warn!(%protocol, %process_id, ?role, "aborted: {}", e);
                e
            })?;
        }
    }

    async fn execute(&self, op: Opcode, process_id: &str) -> Result<Resume, ProtocolError> {
        debug!(%process_id, opcode = op.name(), "executing");
        match op {
            Opcode::Sign {
                commitment,
                key_index,
            } => {
                let signer = self.keys.signer_for(key_index)?;
                let signature = signer.sign_eth(commitment.hash_to_sign())?;
                Ok(Resume::Signed(signature))
            }
            Opcode::Send(message) => {
                let to = message.to_xpub;
                self.transport.send(&to, message).await?;
                Ok(Resume::Done)
            }
            Opcode::SendAndAwait(message) => {
                let to = message.to_xpub;
                self.transport.expect_reply(process_id);
                self.transport.send(&to, message).await?;
                let mut reply = self.transport.await_reply(process_id).await?;
                match reply.custom_data.error.take() {
                    Some(reason) if reason == CHANNEL_BUSY => return Err(ProtocolError::Busy),
                    Some(reason) => return Err(ProtocolError::Refused(reason)),
                    None => {}
                }
                Ok(Resume::Reply(reply))
            }
            Opcode::PersistChannel(channel) => {
                self.store.save_state_channel(&channel).await?;
                Ok(Resume::Done)
            }
            Opcode::WriteCommitment {
                protocol,
                app_identity_hash,
                commitment,
            } => {
                self.store
                    .save_commitment(protocol, &app_identity_hash, &commitment)
                    .await?;
                Ok(Resume::Done)
            }
        }
    }
}
