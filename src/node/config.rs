use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{chain::RetryPolicy, network::NetworkContext};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Node settings, usually loaded from a TOML file.
///
/// ```toml
/// store_key_prefix = "alice"
/// blocks_needed_for_confirmation = 1
///
/// [network]
/// proxy_factory = "0x..."
/// multisig_mastercopy = "0x..."
/// proxy_bytecode = "0x..."
/// free_balance_app = "0x..."
///
/// [deposit_retry]
/// attempts = 5
/// backoff_ms = 500
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    pub network: NetworkContext,
    #[serde(default = "default_store_key_prefix")]
    pub store_key_prefix: String,
    #[serde(default = "default_blocks_needed_for_confirmation")]
    pub blocks_needed_for_confirmation: u64,
    #[serde(default)]
    pub deposit_retry: RetryPolicy,
    #[serde(default)]
    pub deploy_retry: RetryPolicy,
}

fn default_store_key_prefix() -> String {
    "cfcore".to_string()
}

fn default_blocks_needed_for_confirmation() -> u64 {
    1
}

impl NodeConfig {
    pub fn new(network: NetworkContext) -> Self {
        Self {
            network,
            store_key_prefix: default_store_key_prefix(),
            blocks_needed_for_confirmation: default_blocks_needed_for_confirmation(),
            deposit_retry: RetryPolicy::default(),
            deploy_retry: RetryPolicy::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{network::DEFAULT_FREE_BALANCE_TIMEOUT, Address};

    const CONFIG: &str = r#"
        store_key_prefix = "alice"

        [network]
        proxy_factory = "0xf0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0"
        multisig_mastercopy = "0xc0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0"
        proxy_bytecode = "0x6080604052"
        free_balance_app = "0xfbfbfbfbfbfbfbfbfbfbfbfbfbfbfbfbfbfbfbfb"
        default_token_address = "0x1111111111111111111111111111111111111111"

        [deposit_retry]
        attempts = 5
        backoff_ms = 20
    "#;

    #[test]
    fn parses_with_defaults() {
        let config = NodeConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.store_key_prefix, "alice");
        assert_eq!(config.blocks_needed_for_confirmation, 1);
        assert_eq!(config.network.proxy_factory, Address([0xf0; 20]));
        assert_eq!(config.network.proxy_bytecode, vec![0x60, 0x80, 0x60, 0x40, 0x52]);
        assert_eq!(config.network.default_token_address, Address([0x11; 20]));
        assert_eq!(config.network.free_balance_timeout, DEFAULT_FREE_BALANCE_TIMEOUT);
        assert_eq!(
            config.deposit_retry,
            RetryPolicy {
                attempts: 5,
                backoff_ms: 20
            }
        );
        assert_eq!(config.deploy_retry, RetryPolicy::default());
    }

    #[test]
    fn rejects_missing_network() {
        assert!(matches!(
            NodeConfig::from_toml_str("store_key_prefix = \"x\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
