use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AbiEncodings, ChannelError, OutcomeType};
use crate::{
    abiencode::types::{Address, Hash, U256},
    keys::ExtendedPublicKey,
};

/// An app both parties agreed to consider, not yet funded. Never mutated;
/// installing consumes it, rejecting removes it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceProposal {
    /// Identity hash the app will have once installed.
    pub identity_hash: Hash,
    pub app_definition: Address,
    pub abi_encodings: AbiEncodings,
    pub initial_state: Value,
    pub outcome_type: OutcomeType,
    pub initiator_deposit: U256,
    pub initiator_deposit_token_address: Address,
    pub responder_deposit: U256,
    pub responder_deposit_token_address: Address,
    pub timeout: u64,
    pub proposed_by_identifier: ExtendedPublicKey,
    pub proposed_to_identifier: ExtendedPublicKey,
    pub app_seq_no: u64,
    /// Lift the coin transfer limit. Only balance refunds may set it, since
    /// their outcome pays out funds deposited after install.
    #[serde(default)]
    pub disable_limit: bool,
}

impl AppInstanceProposal {
    /// Outcome types that pay a single amount require both deposits in the
    /// same token.
    pub fn check_deposit_tokens(&self) -> Result<(), ChannelError> {
        match self.outcome_type {
            OutcomeType::TwoPartyFixedOutcome | OutcomeType::SingleAssetTwoPartyCoinTransfer
                if self.initiator_deposit_token_address != self.responder_deposit_token_address =>
            {
                Err(ChannelError::MismatchedTokens)
            }
            _ => Ok(()),
        }
    }

    /// Sum of both deposits if they are in the same token.
    pub(super) fn total_deposit(&self) -> Result<U256, ChannelError> {
        self.check_deposit_tokens()?;
        self.initiator_deposit
            .checked_add(self.responder_deposit)
            .ok_or(ChannelError::Overflow {
                token: self.initiator_deposit_token_address,
                address: Address::default(),
            })
    }
}
