//! Typed requests and results of the node's methods.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Node, NodeError, NodeEvent};
use crate::{
    abiencode::types::{Address, Hash, U256},
    app::{CoinBalanceRefundApp, CoinBalanceRefundState},
    chain::{self, ChainProvider, DepositRecord, RetryError},
    channel::{AbiEncodings, AppInstance, OutcomeType, StateChannel, TokenIndexedBalances},
    commitment::get_create2_multisig_address,
    keys::{xkey_kth_address, ExtendedPublicKey},
    protocol::{
        InstallParams, ProposeInstallParams, ProtocolParams, TakeActionParams, UninstallParams,
    },
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    /// Both parties, this node included.
    pub owners: Vec<ExtendedPublicKey>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelResult {
    pub multisig_address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProposeInstallRequest {
    pub proposed_to_identifier: ExtendedPublicKey,
    pub app_definition: Address,
    pub abi_encodings: AbiEncodings,
    pub initial_state: Value,
    pub outcome_type: OutcomeType,
    pub initiator_deposit: U256,
    #[serde(default)]
    pub initiator_deposit_token_address: Option<Address>,
    pub responder_deposit: U256,
    #[serde(default)]
    pub responder_deposit_token_address: Option<Address>,
    pub timeout: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProposeInstallResult {
    pub app_identity_hash: Hash,
}

/// Request naming a single app or proposal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceRequest {
    pub app_identity_hash: Hash,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub app_instance: AppInstance,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TakeActionRequest {
    pub app_identity_hash: Hash,
    pub action: Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TakeActionResult {
    pub new_state: Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct UninstallResult {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FreeBalanceRequest {
    pub multisig_address: Address,
    #[serde(default)]
    pub token_address: Option<Address>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenIndexedFreeBalanceRequest {
    pub multisig_address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub multisig_address: Address,
    pub amount: U256,
    #[serde(default)]
    pub token_address: Option<Address>,
    /// Repeating a request id returns the first deposit's transaction, or
    /// resumes it if it was not credited yet.
    pub request_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositResult {
    pub transaction_hash: Hash,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub multisig_address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    /// `None` if the multisig was already deployed.
    pub transaction_hash: Option<Hash>,
}

impl Node {
    fn default_token(&self) -> Address {
        self.config.network.default_token_address
    }

    fn provider(&self) -> Result<&dyn ChainProvider, NodeError> {
        self.provider.as_deref().ok_or(NodeError::NoChainProvider)
    }

    fn check_free_balance(
        &self,
        channel: &StateChannel,
        owner: &ExtendedPublicKey,
        token: Address,
        required: U256,
    ) -> Result<(), NodeError> {
        let address = xkey_kth_address(owner, 0)?;
        let available = channel.get_free_balance_state()?.balance_of(&token, &address);
        if available < required {
            return Err(NodeError::InsufficientFunds {
                address,
                token,
                available,
                required,
            });
        }
        Ok(())
    }

    /// Record the channel with the given owners. Creating an existing channel
    /// returns it unchanged.
    pub async fn create_channel(
        &self,
        request: CreateChannelRequest,
    ) -> Result<CreateChannelResult, NodeError> {
        let owners: [ExtendedPublicKey; 2] = request.owners.as_slice().try_into().map_err(|_| {
            NodeError::InvalidRequest(format!("expected 2 owners, got {}", request.owners.len()))
        })?;
        if !owners.contains(&self.public_identifier) || owners[0] == owners[1] {
            return Err(NodeError::InvalidRequest(
                "owners must be this node and one counterparty".into(),
            ));
        }
        let multisig_address = get_create2_multisig_address(&owners, &self.config.network)?;

        let guard = self.lock(&multisig_address, None).await;
        if self.store.has_state_channel(&multisig_address).await? {
            return Ok(CreateChannelResult { multisig_address });
        }
        let channel = StateChannel::setup(multisig_address, owners, &self.config.network)?;
        self.store.save_state_channel(&channel).await?;
        drop(guard);

        info!(%multisig_address, "channel created");
        self.emit(NodeEvent::ChannelCreated {
            multisig_address,
            owners: *channel.user_neutered_extended_keys(),
        });
        Ok(CreateChannelResult { multisig_address })
    }

    pub async fn propose_install(
        &self,
        request: ProposeInstallRequest,
    ) -> Result<ProposeInstallResult, NodeError> {
        let counterparty = request.proposed_to_identifier;
        if counterparty == self.public_identifier {
            return Err(NodeError::InvalidRequest("cannot propose to self".into()));
        }
        let multisig_address =
            get_create2_multisig_address(&[self.public_identifier, counterparty], &self.config.network)?;
        let channel = self.channel(&multisig_address).await?;

        let initiator_token = request
            .initiator_deposit_token_address
            .unwrap_or_else(|| self.default_token());
        let responder_token = request
            .responder_deposit_token_address
            .unwrap_or_else(|| self.default_token());
        self.check_free_balance(
            &channel,
            &self.public_identifier,
            initiator_token,
            request.initiator_deposit,
        )?;
        self.check_free_balance(&channel, &counterparty, responder_token, request.responder_deposit)?;

        let params = ProtocolParams::Propose(ProposeInstallParams {
            multisig_address,
            initiator_xpub: self.public_identifier,
            responder_xpub: counterparty,
            app_definition: request.app_definition,
            abi_encodings: request.abi_encodings,
            initial_state: request.initial_state,
            outcome_type: request.outcome_type,
            initiator_deposit: request.initiator_deposit,
            initiator_deposit_token_address: Some(initiator_token),
            responder_deposit: request.responder_deposit,
            responder_deposit_token_address: Some(responder_token),
            timeout: request.timeout,
            disable_limit: false,
        });
        let channel = self.initiate(params).await?;
        Ok(ProposeInstallResult {
            app_identity_hash: latest_proposal(&channel)?,
        })
    }

    pub async fn install(&self, request: AppInstanceRequest) -> Result<InstallResult, NodeError> {
        let id = request.app_identity_hash;
        let channel = self.channel_of_app(&id).await?;
        let proposal = channel.get_proposal(&id)?;
        if proposal.proposed_to_identifier != self.public_identifier {
            return Err(NodeError::InvalidRequest(
                "only the party a proposal was made to installs it".into(),
            ));
        }

        let channel = self
            .initiate(ProtocolParams::Install(InstallParams {
                multisig_address: channel.multisig_address(),
                initiator_xpub: self.public_identifier,
                responder_xpub: self.counterparty(&channel)?,
                app_identity_hash: id,
            }))
            .await?;
        Ok(InstallResult {
            app_instance: channel.get_app_instance(&id)?.clone(),
        })
    }

    /// Drop a proposal locally. The counterparty is not involved.
    pub async fn reject_install(
        &self,
        request: AppInstanceRequest,
    ) -> Result<UninstallResult, NodeError> {
        let id = request.app_identity_hash;
        let multisig_address = self.channel_of_app(&id).await?.multisig_address();

        let guard = self.lock(&multisig_address, Some(&id)).await;
        let channel = self.channel(&multisig_address).await?.remove_proposal(&id)?;
        self.store.save_state_channel(&channel).await?;
        drop(guard);

        self.emit(NodeEvent::RejectInstall {
            multisig_address,
            app_identity_hash: id,
        });
        Ok(UninstallResult {})
    }

    pub async fn take_action(
        &self,
        request: TakeActionRequest,
    ) -> Result<TakeActionResult, NodeError> {
        let id = request.app_identity_hash;
        let channel = self.channel_of_app(&id).await?;
        channel.get_app_instance(&id)?;

        let channel = self
            .initiate(ProtocolParams::TakeAction(TakeActionParams {
                multisig_address: channel.multisig_address(),
                initiator_xpub: self.public_identifier,
                responder_xpub: self.counterparty(&channel)?,
                app_identity_hash: id,
                action: request.action,
                version_number: None,
            }))
            .await?;
        Ok(TakeActionResult {
            new_state: channel.get_app_instance(&id)?.latest_state.clone(),
        })
    }

    pub async fn uninstall(&self, request: AppInstanceRequest) -> Result<UninstallResult, NodeError> {
        let id = request.app_identity_hash;
        let channel = self.channel_of_app(&id).await?;
        if channel.is_free_balance(&id) {
            return Err(NodeError::InvalidRequest(
                "the free balance cannot be uninstalled".into(),
            ));
        }
        channel.get_app_instance(&id)?;

        self.initiate(ProtocolParams::Uninstall(UninstallParams {
            multisig_address: channel.multisig_address(),
            initiator_xpub: self.public_identifier,
            responder_xpub: self.counterparty(&channel)?,
            app_identity_hash: id,
        }))
        .await?;
        Ok(UninstallResult {})
    }

    /// Free balance of every owner in one token, the default token if none
    /// is given.
    pub async fn get_free_balance_state(
        &self,
        request: FreeBalanceRequest,
    ) -> Result<BTreeMap<Address, U256>, NodeError> {
        let channel = self.channel(&request.multisig_address).await?;
        let token = request.token_address.unwrap_or_else(|| self.default_token());
        let free_balance = channel.get_free_balance_state()?;
        Ok(channel
            .multisig_owners()?
            .into_iter()
            .map(|owner| (owner, free_balance.balance_of(&token, &owner)))
            .collect())
    }

    pub async fn get_token_indexed_free_balance_states(
        &self,
        request: TokenIndexedFreeBalanceRequest,
    ) -> Result<TokenIndexedBalances, NodeError> {
        let channel = self.channel(&request.multisig_address).await?;
        Ok(channel.get_free_balance_state()?.balances().clone())
    }

    pub async fn get_app_instance(
        &self,
        request: AppInstanceRequest,
    ) -> Result<AppInstance, NodeError> {
        let id = request.app_identity_hash;
        let channel = self.channel_of_app(&id).await?;
        Ok(channel.get_app_instance(&id)?.clone())
    }

    /// Move funds from this node's signer into the multisig and credit them
    /// to this node's free balance.
    ///
    /// A balance refund watching the multisig is installed before sending.
    /// Uninstalling it once the deposit confirmed credits what the multisig
    /// gained. The transaction is recorded under the request id right after
    /// it is sent, so repeating a request resumes it instead of sending again.
    pub async fn deposit(&self, request: DepositRequest) -> Result<DepositResult, NodeError> {
        let provider = self.provider()?;
        let refund_app = self
            .config
            .network
            .coin_balance_refund_app
            .ok_or_else(|| NodeError::InvalidRequest("no balance refund app configured".into()))?;
        let multisig_address = request.multisig_address;
        let token_address = request.token_address.unwrap_or_else(|| self.default_token());
        let request_id = request.request_id;
        let channel = self.channel(&multisig_address).await?;
        self.counterparty(&channel)?;

        let _deposit = self
            .locks
            .acquire(vec![format!("deposit/{}", multisig_address)])
            .await;
        let record = self.store.get_deposit(&request_id).await?;
        let transaction_hash = match record {
            Some(record)
                if record.multisig_address != multisig_address
                    || record.token_address != token_address =>
            {
                return Err(NodeError::InvalidRequest(format!(
                    "request {} deposited into {}",
                    request_id, record.multisig_address
                )));
            }
            Some(record) if record.credited => {
                return Ok(DepositResult {
                    transaction_hash: record.transaction_hash,
                })
            }
            Some(record) => {
                debug!(
                    %multisig_address,
                    %request_id,
                    tx = %record.transaction_hash,
                    "resuming deposit"
                );
                record.transaction_hash
            }
            None => {
                let proposed = channel.proposed_app_instances().values().any(|p| {
                    p.app_definition == refund_app
                        && p.initiator_deposit_token_address == token_address
                });
                if proposed || balance_refund(&channel, refund_app, token_address)?.is_some() {
                    return Err(NodeError::InvalidRequest(format!(
                        "another deposit of token {} is in progress",
                        token_address
                    )));
                }
                let signer = xkey_kth_address(&self.public_identifier, 0)?;
                let available = provider.get_balance(signer, token_address).await?;
                if available < request.amount {
                    return Err(NodeError::InsufficientFunds {
                        address: signer,
                        token: token_address,
                        available,
                        required: request.amount,
                    });
                }

                let refund = self
                    .install_balance_refund(provider, refund_app, &channel, token_address)
                    .await?;
                let deposit = chain::DepositRequest {
                    multisig_address,
                    amount: request.amount,
                    token_address,
                };
                let sent = chain::send_deposit(
                    provider,
                    &self.config.deposit_retry,
                    &deposit,
                    self.default_token(),
                )
                .await;
                let tx = match sent {
                    Ok(tx) => tx,
                    Err(e) => {
                        // Nothing reached the chain, so the refund credits nothing.
                        self.uninstall_balance_refund(&channel, refund).await?;
                        return Err(self.deposit_failed(multisig_address, request_id, e));
                    }
                };
                let record = DepositRecord {
                    multisig_address,
                    token_address,
                    transaction_hash: tx,
                    credited: false,
                };
                self.store.save_deposit(&request_id, &record).await?;
                tx
            }
        };

        let confirmed = chain::confirm_transaction(
            provider,
            &self.config.deposit_retry,
            transaction_hash,
            self.config.blocks_needed_for_confirmation,
        )
        .await;
        if let Err(e) = confirmed {
            // The refund stays installed for the request to be resumed.
            return Err(self.deposit_failed(multisig_address, request_id, e));
        }

        let channel = self.channel(&multisig_address).await?;
        if let Some((refund, _)) = balance_refund(&channel, refund_app, token_address)? {
            self.uninstall_balance_refund(&channel, refund).await?;
        }
        let record = DepositRecord {
            multisig_address,
            token_address,
            transaction_hash,
            credited: true,
        };
        self.store.save_deposit(&request_id, &record).await?;
        info!(%multisig_address, %request_id, tx = %transaction_hash, "deposit credited");

        self.emit(NodeEvent::DepositConfirmed {
            multisig_address,
            request_id,
            transaction_hash,
        });
        Ok(DepositResult { transaction_hash })
    }

    /// Propose and install a balance refund for this node, with the current
    /// balance of the multisig as threshold.
    async fn install_balance_refund(
        &self,
        provider: &dyn ChainProvider,
        refund_app: Address,
        channel: &StateChannel,
        token: Address,
    ) -> Result<Hash, NodeError> {
        let multisig_address = channel.multisig_address();
        let counterparty = self.counterparty(channel)?;
        let threshold = provider.get_balance(multisig_address, token).await?;
        let state = CoinBalanceRefundState {
            recipient: xkey_kth_address(&self.public_identifier, 0)?,
            multisig: multisig_address,
            threshold,
            token_address: token,
        };
        let proposed = self
            .initiate(ProtocolParams::Propose(ProposeInstallParams {
                multisig_address,
                initiator_xpub: self.public_identifier,
                responder_xpub: counterparty,
                app_definition: refund_app,
                abi_encodings: AbiEncodings {
                    state_encoding: CoinBalanceRefundApp::STATE_ENCODING.into(),
                    action_encoding: None,
                },
                initial_state: serde_json::to_value(&state)?,
                outcome_type: OutcomeType::SingleAssetTwoPartyCoinTransfer,
                initiator_deposit: U256::zero(),
                initiator_deposit_token_address: Some(token),
                responder_deposit: U256::zero(),
                responder_deposit_token_address: Some(token),
                timeout: CoinBalanceRefundApp::TIMEOUT,
                disable_limit: true,
            }))
            .await?;
        let id = latest_proposal(&proposed)?;
        self.initiate(ProtocolParams::Install(InstallParams {
            multisig_address,
            initiator_xpub: self.public_identifier,
            responder_xpub: counterparty,
            app_identity_hash: id,
        }))
        .await?;
        debug!(%multisig_address, app = %id, %threshold, "balance refund installed");
        Ok(id)
    }

    async fn uninstall_balance_refund(
        &self,
        channel: &StateChannel,
        refund: Hash,
    ) -> Result<(), NodeError> {
        self.initiate(ProtocolParams::Uninstall(UninstallParams {
            multisig_address: channel.multisig_address(),
            initiator_xpub: self.public_identifier,
            responder_xpub: self.counterparty(channel)?,
            app_identity_hash: refund,
        }))
        .await?;
        Ok(())
    }

    fn deposit_failed(
        &self,
        multisig_address: Address,
        request_id: String,
        error: RetryError,
    ) -> NodeError {
        warn!(%multisig_address, %request_id, "deposit failed: {}", error);
        self.emit(NodeEvent::DepositFailed {
            multisig_address,
            request_id,
            error: error.to_string(),
        });
        NodeError::DepositFailed(error)
    }

    pub async fn deploy_state_deposit_holder(
        &self,
        request: DeployRequest,
    ) -> Result<DeployResult, NodeError> {
        let provider = self.provider()?;
        let channel = self.channel(&request.multisig_address).await?;
        let guard = self
            .locks
            .acquire(vec![format!("deploy/{}", request.multisig_address)])
            .await;
        let transaction_hash = chain::deploy_multisig(
            provider,
            &self.config.deploy_retry,
            &self.config.network,
            &channel,
            self.config.blocks_needed_for_confirmation,
        )
        .await?;
        drop(guard);
        Ok(DeployResult { transaction_hash })
    }
}

/// Id of the proposal with the highest sequence number.
fn latest_proposal(channel: &StateChannel) -> Result<Hash, NodeError> {
    let seq = channel.num_proposed_apps();
    channel
        .proposed_app_instances()
        .values()
        .find(|p| p.app_seq_no == seq)
        .map(|p| p.identity_hash)
        .ok_or_else(|| NodeError::InvalidRequest("proposal was not recorded".into()))
}

/// The installed balance refund of `token`, if any.
fn balance_refund(
    channel: &StateChannel,
    refund_app: Address,
    token: Address,
) -> Result<Option<(Hash, CoinBalanceRefundState)>, NodeError> {
    for app in channel.app_instances().values() {
        if app.app_definition() != refund_app {
            continue;
        }
        let state = CoinBalanceRefundApp::state(&app.latest_state)
            .map_err(|e| NodeError::Protocol(e.into()))?;
        if state.token_address == token {
            return Ok(Some((app.identity_hash, state)));
        }
    }
    Ok(None)
}
