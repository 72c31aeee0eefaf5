//! On-chain side: deposits into the multisig and its deployment.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    abiencode::{
        function_selector, to_fnargs_writer,
        types::{hex_bytes, Address, Hash, U256},
        AbiValue,
    },
    channel::StateChannel,
    commitment::{get_create2_multisig_address, multisig_setup_data},
    keys::KeyError,
    network::NetworkContext,
};

pub const ETH_DEPOSIT_GAS_LIMIT: u64 = 30_000;
pub const ERC20_DEPOSIT_GAS_LIMIT: u64 = 100_000;
pub const CREATE_PROXY_AND_SETUP_GAS: u64 = 500_000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: Address,
    pub value: U256,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub gas_price: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Refused by the signer or the user. Never retried.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("chain request failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Balance of `address` in `token`, the network's default token meaning
    /// the native currency.
    async fn get_balance(&self, address: Address, token: Address) -> Result<U256, ChainError>;

    async fn get_code(&self, address: Address) -> Result<Vec<u8>, ChainError>;

    async fn get_gas_price(&self) -> Result<U256, ChainError>;

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<Hash, ChainError>;

    async fn wait_for_confirmations(&self, tx: Hash, confirmations: u64) -> Result<(), ChainError>;
}

/// Bounded retry with linear backoff: after failed attempt `n` the next one
/// starts `backoff_ms * n` milliseconds later.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last: String,
    },
}

/// Run `attempt` until it succeeds, is rejected or the policy is exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last = String::new();
    for n in 1..=attempts {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(ChainError::Rejected(reason)) => {
                return Err(RetryError::Rejected { operation, reason })
            }
            Err(ChainError::Failed(reason)) => {
                warn!(operation, attempt = n, "{}", reason);
                last = reason;
                if n < attempts {
                    tokio::time::sleep(policy.backoff_after(n)).await;
                }
            }
        }
    }
    Err(RetryError::Exhausted {
        operation,
        attempts,
        last,
    })
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub multisig_address: Address,
    pub amount: U256,
    pub token_address: Address,
}

/// Transaction moving `amount` of `token` into the multisig. The native
/// currency is sent as value, anything else through `transfer` on the token.
pub fn deposit_transaction(
    request: &DepositRequest,
    native_token: Address,
    gas_price: U256,
) -> TransactionRequest {
    if request.token_address == native_token {
        return TransactionRequest {
            to: request.multisig_address,
            value: request.amount,
            data: Vec::new(),
            gas_limit: ETH_DEPOSIT_GAS_LIMIT,
            gas_price,
        };
    }
    let mut data = function_selector("transfer(address,uint256)").to_vec();
    to_fnargs_writer(
        &[
            AbiValue::Address(request.multisig_address),
            AbiValue::Uint(request.amount),
        ],
        &mut data,
    );
    TransactionRequest {
        to: request.token_address,
        value: U256::zero(),
        data,
        gas_limit: ERC20_DEPOSIT_GAS_LIMIT,
        gas_price,
    }
}

/// Progress of a deposit, stored under its request id as soon as the
/// transaction is broadcast so that a retried request never sends twice.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub multisig_address: Address,
    pub token_address: Address,
    pub transaction_hash: Hash,
    /// Set once the deposit is confirmed and credited to the free balance.
    pub credited: bool,
}

/// Broadcast the deposit. Only the broadcast is retried.
pub async fn send_deposit(
    provider: &dyn ChainProvider,
    policy: &RetryPolicy,
    request: &DepositRequest,
    native_token: Address,
) -> Result<Hash, RetryError> {
    with_retry(policy, "deposit", |_| async move {
        let gas_price = provider.get_gas_price().await?;
        let tx = provider
            .send_transaction(deposit_transaction(request, native_token, gas_price))
            .await?;
        debug!(%tx, "deposit sent");
        Ok::<_, ChainError>(tx)
    })
    .await
}

/// Wait for `confirmations` on an already broadcast transaction.
pub async fn confirm_transaction(
    provider: &dyn ChainProvider,
    policy: &RetryPolicy,
    tx: Hash,
    confirmations: u64,
) -> Result<(), RetryError> {
    with_retry(policy, "confirmation", |_| async move {
        provider.wait_for_confirmations(tx, confirmations).await?;
        debug!(%tx, confirmations, "transaction confirmed");
        Ok::<_, ChainError>(())
    })
    .await
}

/// Send the deposit and wait for `confirmations`.
pub async fn make_deposit(
    provider: &dyn ChainProvider,
    policy: &RetryPolicy,
    request: &DepositRequest,
    native_token: Address,
    confirmations: u64,
) -> Result<Hash, RetryError> {
    let tx = send_deposit(provider, policy, request, native_token).await?;
    confirm_transaction(provider, policy, tx, confirmations).await?;
    Ok(tx)
}

/// `createProxyWithNonce(mastercopy, setup(owners), 0)` on the proxy factory.
pub fn create_proxy_transaction(
    network: &NetworkContext,
    owners: &[Address],
    gas_price: U256,
) -> TransactionRequest {
    let mut data = function_selector("createProxyWithNonce(address,bytes,uint256)").to_vec();
    to_fnargs_writer(
        &[
            AbiValue::Address(network.multisig_mastercopy),
            AbiValue::Bytes(multisig_setup_data(owners)),
            AbiValue::Uint(U256::zero()),
        ],
        &mut data,
    );
    TransactionRequest {
        to: network.proxy_factory,
        value: U256::zero(),
        data,
        gas_limit: CREATE_PROXY_AND_SETUP_GAS,
        gas_price,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployError {
    #[error("channel multisig {found} is not the derived address {expected}")]
    IncorrectMultisigAddress { expected: Address, found: Address },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("channel has no owners: {0}")]
    Owners(String),
    #[error("no code at {multisig} after {tx}")]
    NotDeployed { multisig: Address, tx: Hash },
    #[error(transparent)]
    Retry(#[from] RetryError),
}

/// Deploy the channel's multisig unless it already has code. Returns the
/// transaction that deployed it, `None` if nothing had to be sent.
pub async fn deploy_multisig(
    provider: &dyn ChainProvider,
    policy: &RetryPolicy,
    network: &NetworkContext,
    channel: &StateChannel,
    confirmations: u64,
) -> Result<Option<Hash>, DeployError> {
    let multisig = channel.multisig_address();
    let expected = get_create2_multisig_address(channel.user_neutered_extended_keys(), network)?;
    if expected != multisig {
        return Err(DeployError::IncorrectMultisigAddress {
            expected,
            found: multisig,
        });
    }
    let owners = channel
        .multisig_owners()
        .map_err(|e| DeployError::Owners(e.to_string()))?;
    let owners = &owners;

    let code = with_retry(policy, "multisig lookup", |_| provider.get_code(multisig)).await?;
    if !code.is_empty() {
        return Ok(None);
    }
    let tx = with_retry(policy, "multisig deployment", |_| async move {
        let gas_price = provider.get_gas_price().await?;
        provider
            .send_transaction(create_proxy_transaction(network, owners, gas_price))
            .await
    })
    .await?;
    confirm_transaction(provider, policy, tx, confirmations).await?;
    let code = with_retry(policy, "multisig lookup", |_| provider.get_code(multisig)).await?;
    if code.is_empty() {
        return Err(DeployError::NotDeployed { multisig, tx });
    }
    debug!(%tx, %multisig, "multisig deployed");
    Ok(Some(tx))
}
