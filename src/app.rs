//! Off-chain mirrors of app contracts.
//!
//! The protocol never runs contract code. Instead every app definition address
//! the node supports maps to an [AppLogic] in an explicit [AppRegistry] that is
//! built once and handed to the node.

mod coin_balance_refund;
mod unidirectional_transfer;

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use serde_json::Value;

use crate::{
    abiencode::types::{Address, U256},
    channel::{AppInstance, AppOutcome},
};

pub use coin_balance_refund::{CoinBalanceRefundApp, CoinBalanceRefundState};
pub use unidirectional_transfer::{TransferAction, TransferState, UnidirectionalTransferApp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("no logic registered for app definition {0}")]
    UnknownAppDefinition(Address),
    #[error("outcome needs the {token} balance of {holder}")]
    MissingBalance { holder: Address, token: Address },
}

/// An on-chain balance an outcome depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BalanceQuery {
    pub holder: Address,
    pub token: Address,
}

/// Balances read from the chain before computing an outcome.
pub type ObservedBalances = BTreeMap<BalanceQuery, U256>;

/// Pure state transition and outcome of one kind of app.
///
/// Apps whose outcome depends on the chain name the balances they need in
/// [AppLogic::balance_queries]; the caller reads them and passes them back
/// to [AppLogic::compute_outcome].
pub trait AppLogic: Send + Sync {
    fn apply_action(&self, state: &Value, action: &Value) -> Result<Value, AppError>;

    fn compute_outcome(
        &self,
        state: &Value,
        observed: &ObservedBalances,
    ) -> Result<AppOutcome, AppError>;

    fn balance_queries(&self, _state: &Value) -> Result<Vec<BalanceQuery>, AppError> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: HashMap<Address, Arc<dyn AppLogic>>,
}

impl fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.apps.keys()).finish()
    }
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, app_definition: Address, logic: Arc<dyn AppLogic>) -> Self {
        self.apps.insert(app_definition, logic);
        self
    }

    pub fn get(&self, app_definition: &Address) -> Result<&Arc<dyn AppLogic>, AppError> {
        self.apps
            .get(app_definition)
            .ok_or(AppError::UnknownAppDefinition(*app_definition))
    }

    pub fn apply_action(&self, app: &AppInstance, action: &Value) -> Result<Value, AppError> {
        self.get(&app.app_definition())?
            .apply_action(&app.latest_state, action)
    }

    pub fn compute_outcome(
        &self,
        app: &AppInstance,
        observed: &ObservedBalances,
    ) -> Result<AppOutcome, AppError> {
        self.get(&app.app_definition())?
            .compute_outcome(&app.latest_state, observed)
    }

    pub fn balance_queries(&self, app: &AppInstance) -> Result<Vec<BalanceQuery>, AppError> {
        self.get(&app.app_definition())?
            .balance_queries(&app.latest_state)
    }
}
