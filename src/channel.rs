//! Channel and application data model.
//!
//! Everything in here is a value: operations on a [StateChannel] take `&self`
//! and return the channel after the operation, so a protocol run can compute
//! the post-state, get it signed, and only then replace what is stored.

mod app_instance;
mod free_balance;
mod outcome;
mod proposal;
mod state_channel;

pub use app_instance::{AbiEncodings, AppIdentity, AppInstance, OutcomeType};
pub use free_balance::{
    CoinTransfer, FreeBalance, FreeBalanceState, FREE_BALANCE_STATE_ENCODING,
};
pub use outcome::{
    compute_token_indexed_increments, AppOutcome, InterpreterParams,
    MultiAssetMultiPartyCoinTransferParams, SingleAssetTwoPartyCoinTransferParams,
    TwoPartyFixedOutcome, TwoPartyFixedOutcomeParams,
};
pub use proposal::AppInstanceProposal;
pub use state_channel::StateChannel;

use std::collections::BTreeMap;

use crate::{
    abiencode::{
        self,
        types::{Address, Hash},
    },
    keys::KeyError,
    U256,
};

/// Balances per token, per address.
pub type TokenIndexedBalances = BTreeMap<Address, BTreeMap<Address, U256>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("no app instance {0}")]
    NoSuchApp(Hash),
    #[error("no proposal {0}")]
    NoSuchProposal(Hash),
    #[error("channel {0} has no free balance")]
    FreeBalanceMissing(Address),
    #[error("the free balance cannot be uninstalled")]
    CannotUninstallFreeBalance,
    #[error("proposal has sequence number {found}, expected {expected}")]
    SequenceMismatch { expected: u64, found: u64 },
    #[error("identity hash {found} does not match {expected}")]
    IdentityMismatch { expected: Hash, found: Hash },
    #[error("{address} has insufficient funds in token {token}")]
    InsufficientFunds { token: Address, address: Address },
    #[error("balance overflow for {address} in token {token}")]
    Overflow { token: Address, address: Address },
    #[error("invalid free balance state: {0}")]
    InvalidFreeBalanceState(String),
    #[error("app {0} has no action encoding")]
    NoActionEncoding(Hash),
    #[error("outcome does not match outcome type {0:?}")]
    OutcomeTypeMismatch(OutcomeType),
    #[error("outcome pays {total} in token {token}, limit is {limit}")]
    ExceedsLimit {
        token: Address,
        total: U256,
        limit: U256,
    },
    #[error("deposits of this outcome type must use a single token")]
    MismatchedTokens,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}
