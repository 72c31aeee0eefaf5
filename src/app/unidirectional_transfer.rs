//! Payments from the first to the second party, one action per payment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AppError, AppLogic, ObservedBalances};
use crate::{
    abiencode::types::U256,
    channel::{AppOutcome, CoinTransfer},
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    /// `[payer, payee]`
    pub transfers: [CoinTransfer; 2],
    pub turn_num: U256,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransferAction {
    pub amount: U256,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnidirectionalTransferApp;

impl UnidirectionalTransferApp {
    pub const STATE_ENCODING: &'static str =
        "tuple(tuple(address to, uint256 amount)[2] transfers, uint256 turnNum)";
    pub const ACTION_ENCODING: &'static str = "tuple(uint256 amount)";

    fn state(state: &Value) -> Result<TransferState, AppError> {
        serde_json::from_value(state.clone()).map_err(|e| AppError::InvalidState(e.to_string()))
    }
}

impl AppLogic for UnidirectionalTransferApp {
    fn apply_action(&self, state: &Value, action: &Value) -> Result<Value, AppError> {
        let mut state = Self::state(state)?;
        let action: TransferAction = serde_json::from_value(action.clone())
            .map_err(|e| AppError::InvalidAction(e.to_string()))?;

        if action.amount.is_zero() {
            return Err(AppError::InvalidAction("zero payment".into()));
        }
        let [payer, payee] = &mut state.transfers;
        payer.amount = payer
            .amount
            .checked_sub(action.amount)
            .ok_or_else(|| AppError::InvalidAction(format!("cannot pay {}", action.amount)))?;
        payee.amount = payee
            .amount
            .checked_add(action.amount)
            .ok_or_else(|| AppError::InvalidState("overflow".into()))?;
        state.turn_num = state.turn_num + U256::one();

        serde_json::to_value(state).map_err(|e| AppError::InvalidState(e.to_string()))
    }

    fn compute_outcome(
        &self,
        state: &Value,
        _observed: &ObservedBalances,
    ) -> Result<AppOutcome, AppError> {
        let state = Self::state(state)?;
        Ok(AppOutcome::SingleAssetCoinTransfers(state.transfers.to_vec()))
    }
}
