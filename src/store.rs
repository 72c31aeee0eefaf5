//! Persistence behind a key-value [StoreService].
//!
//! Records live under `<prefix>/channel/<multisig>`,
//! `<prefix>/commitment/<protocol>/<app>` and `<prefix>/deposit/<request>`.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    abiencode::types::{Address, Hash},
    chain::DepositRecord,
    channel::StateChannel,
    commitment::SignedSetStateCommitment,
    protocol::Protocol,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("nothing stored at {0}")]
    NotFound(String),
    #[error("stored record is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StoreService: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Write all pairs at once.
    async fn set(&self, pairs: Vec<(String, Value)>) -> Result<(), StoreError>;

    /// All entries whose path starts with `prefix`, in path order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreService for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().get(path).cloned())
    }

    async fn set(&self, pairs: Vec<(String, Value)>) -> Result<(), StoreError> {
        self.entries.write().extend(pairs);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Typed access to the records of one node.
#[derive(Clone)]
pub struct Store {
    service: Arc<dyn StoreService>,
    prefix: String,
}

impl Store {
    pub fn new(service: Arc<dyn StoreService>, prefix: impl Into<String>) -> Self {
        Self {
            service,
            prefix: prefix.into(),
        }
    }

    fn channel_path(&self, multisig: &Address) -> String {
        format!("{}/channel/{}", self.prefix, multisig)
    }

    fn commitment_path(&self, protocol: Protocol, app: &Hash) -> String {
        format!("{}/commitment/{}/{}", self.prefix, protocol, app)
    }

    fn deposit_path(&self, request_id: &str) -> String {
        format!("{}/deposit/{}", self.prefix, request_id)
    }

    async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.service.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_typed<T: Serialize + ?Sized>(&self, path: String, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.service.set(vec![(path, value)]).await
    }

    pub async fn save_state_channel(&self, channel: &StateChannel) -> Result<(), StoreError> {
        self.set_typed(self.channel_path(&channel.multisig_address()), channel)
            .await
    }

    pub async fn get_state_channel(
        &self,
        multisig: &Address,
    ) -> Result<Option<StateChannel>, StoreError> {
        self.get_typed(&self.channel_path(multisig)).await
    }

    pub async fn has_state_channel(&self, multisig: &Address) -> Result<bool, StoreError> {
        Ok(self.service.get(&self.channel_path(multisig)).await?.is_some())
    }

    /// Like [Self::get_state_channel] but a missing channel is an error.
    pub async fn require_state_channel(&self, multisig: &Address) -> Result<StateChannel, StoreError> {
        self.get_state_channel(multisig)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.channel_path(multisig)))
    }

    pub async fn get_all_channels(&self) -> Result<Vec<StateChannel>, StoreError> {
        let prefix = format!("{}/channel/", self.prefix);
        self.service
            .get_prefix(&prefix)
            .await?
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    /// The channel holding `app` as installed app, proposal or free balance.
    pub async fn get_channel_from_app_instance_id(
        &self,
        app: &Hash,
    ) -> Result<Option<StateChannel>, StoreError> {
        Ok(self.get_all_channels().await?.into_iter().find(|c| {
            c.has_app_instance(app) || c.get_proposal(app).is_ok() || c.is_free_balance(app)
        }))
    }

    pub async fn save_commitment(
        &self,
        protocol: Protocol,
        app: &Hash,
        commitment: &SignedSetStateCommitment,
    ) -> Result<(), StoreError> {
        self.set_typed(self.commitment_path(protocol, app), commitment)
            .await
    }

    pub async fn get_commitment(
        &self,
        protocol: Protocol,
        app: &Hash,
    ) -> Result<Option<SignedSetStateCommitment>, StoreError> {
        self.get_typed(&self.commitment_path(protocol, app)).await
    }

    pub async fn save_deposit(
        &self,
        request_id: &str,
        record: &DepositRecord,
    ) -> Result<(), StoreError> {
        self.set_typed(self.deposit_path(request_id), record).await
    }

    pub async fn get_deposit(&self, request_id: &str) -> Result<Option<DepositRecord>, StoreError> {
        self.get_typed(&self.deposit_path(request_id)).await
    }
}
