//! Credits a deposit to the depositor's free balance.
//!
//! Installed before the deposit is sent with the multisig's balance at that
//! time as threshold. Uninstalling it after the deposit confirmed pays
//! whatever the multisig gained since to the recipient.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AppError, AppLogic, BalanceQuery, ObservedBalances};
use crate::{
    abiencode::types::{Address, U256},
    channel::{AppOutcome, CoinTransfer},
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalanceRefundState {
    pub recipient: Address,
    pub multisig: Address,
    pub threshold: U256,
    pub token_address: Address,
}

impl CoinBalanceRefundState {
    pub fn query(&self) -> BalanceQuery {
        BalanceQuery {
            holder: self.multisig,
            token: self.token_address,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CoinBalanceRefundApp;

impl CoinBalanceRefundApp {
    pub const STATE_ENCODING: &'static str =
        "tuple(address recipient, address multisig, uint256 threshold, address tokenAddress)";
    /// Timeout of refund apps, in blocks.
    pub const TIMEOUT: u64 = 1008;

    pub fn state(state: &Value) -> Result<CoinBalanceRefundState, AppError> {
        serde_json::from_value(state.clone()).map_err(|e| AppError::InvalidState(e.to_string()))
    }
}

impl AppLogic for CoinBalanceRefundApp {
    fn apply_action(&self, _state: &Value, _action: &Value) -> Result<Value, AppError> {
        Err(AppError::InvalidAction("balance refunds take no actions".into()))
    }

    fn compute_outcome(
        &self,
        state: &Value,
        observed: &ObservedBalances,
    ) -> Result<AppOutcome, AppError> {
        let state = Self::state(state)?;
        let query = state.query();
        let balance = observed.get(&query).ok_or(AppError::MissingBalance {
            holder: query.holder,
            token: query.token,
        })?;
        Ok(AppOutcome::SingleAssetCoinTransfers(vec![
            CoinTransfer {
                to: state.recipient,
                amount: balance.saturating_sub(state.threshold),
            },
            CoinTransfer {
                to: Address::default(),
                amount: U256::zero(),
            },
        ]))
    }

    fn balance_queries(&self, state: &Value) -> Result<Vec<BalanceQuery>, AppError> {
        Ok(vec![Self::state(state)?.query()])
    }
}
