//! Addresses and constants both parties of a channel must agree on.

use serde::{Deserialize, Serialize};

use crate::abiencode::types::{hex_bytes, Address};

/// Token address standing for the chain's native currency.
pub const CONVENTION_FOR_ETH_TOKEN_ADDRESS: Address = Address([0; 20]);

/// Default timeout of the free balance, in blocks.
pub const DEFAULT_FREE_BALANCE_TIMEOUT: u64 = 172_800;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NetworkContext {
    pub proxy_factory: Address,
    pub multisig_mastercopy: Address,
    /// Creation code of the proxy the factory deploys, used for CREATE2.
    #[serde(with = "hex_bytes")]
    pub proxy_bytecode: Vec<u8>,
    pub free_balance_app: Address,
    /// Definition of the app crediting deposits. Deposits are refused
    /// without one.
    #[serde(default)]
    pub coin_balance_refund_app: Option<Address>,
    /// Substituted wherever a request omits a token address.
    #[serde(default = "default_token_address")]
    pub default_token_address: Address,
    #[serde(default = "default_free_balance_timeout")]
    pub free_balance_timeout: u64,
}

fn default_token_address() -> Address {
    CONVENTION_FOR_ETH_TOKEN_ADDRESS
}

fn default_free_balance_timeout() -> u64 {
    DEFAULT_FREE_BALANCE_TIMEOUT
}
