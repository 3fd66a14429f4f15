use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::engine::{EngineSettings, SendOptions, DEFAULT_GAS_LIMIT, DEFAULT_MAX_RECEIPT_ATTEMPTS};
use crate::ethereum::{signer, utils};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub networks: HashMap<String, NetworkConfig>,
    pub default_network: String,
    pub security: SecurityConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GasConfig {
    pub default_gas_limit: Option<u64>,
    pub max_gas_price: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub allow_write_operations: bool,
}

/// Options of the bound contract and its send lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub contract_label: String,
    pub address: Option<String>,
    /// Interface description file (bare ABI array or build artifact).
    pub abi_path: Option<String>,
    /// Deployment descriptor file; takes precedence over `address`/`abi_path`.
    pub deployment_path: Option<String>,
    pub default_account: Option<String>,
    pub private_key: Option<String>,
    pub origin_block: u64,
    pub gas_limit: Option<u64>,
    pub default_send: SendConfig,
    pub receipt_poll_interval_ms: u64,
    pub max_receipt_attempts: u32,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendConfig {
    pub from: Option<String>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            contract_label: "contract".to_string(),
            address: None,
            abi_path: None,
            deployment_path: None,
            default_account: None,
            private_key: None,
            origin_block: 0,
            gas_limit: None,
            default_send: SendConfig::default(),
            receipt_poll_interval_ms: 1_000,
            max_receipt_attempts: DEFAULT_MAX_RECEIPT_ATTEMPTS,
            settle_delay_ms: 15_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut networks = HashMap::new();

        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                chain_id: 1,
                explorer_url: Some("https://etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: None,
                    max_gas_price: Some(50_000_000_000), // 50 Gwei
                },
            },
        );

        networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: "https://eth-sepolia.g.alchemy.com/v2/demo".to_string(),
                chain_id: 11155111,
                explorer_url: Some("https://sepolia.etherscan.io".to_string()),
                gas: GasConfig {
                    default_gas_limit: None,
                    max_gas_price: Some(20_000_000_000), // 20 Gwei
                },
            },
        );

        networks.insert(
            "local".to_string(),
            NetworkConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                explorer_url: None,
                gas: GasConfig::default(),
            },
        );

        Self {
            networks,
            default_network: "local".to_string(),
            security: SecurityConfig {
                allow_write_operations: false,
            },
            engine: EngineConfig::default(),
        }
    }
}

fn parse_optional_address(field: &str, value: Option<&str>) -> Result<Option<Address>> {
    value
        .map(|address| {
            utils::validate_address(address).map_err(|e| anyhow!("Invalid {}: {}", field, e))
        })
        .transpose()
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        let available: Vec<String> = self.networks.keys().cloned().collect();
        utils::validate_network(name, &available)?;
        self.networks
            .get(name)
            .ok_or_else(|| anyhow!("Network '{}' is not configured", name))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(api_key) = std::env::var("ALCHEMY_API_KEY") {
            tracing::info!("Using ALCHEMY_API_KEY environment variable for RPC URLs");

            for (network_name, network_config) in &mut self.networks {
                if network_config.rpc_url.contains("alchemy.com/v2/demo") {
                    network_config.rpc_url = network_config
                        .rpc_url
                        .replace("/demo", &format!("/{}", api_key));
                    tracing::debug!("Updated {} RPC URL with API key", network_name);
                } else if network_config.rpc_url.contains("YOUR_API_KEY_HERE") {
                    network_config.rpc_url = network_config
                        .rpc_url
                        .replace("YOUR_API_KEY_HERE", &api_key);
                    tracing::debug!("Updated {} RPC URL with API key", network_name);
                }
            }
        } else {
            for (network_name, network_config) in &self.networks {
                if network_config.rpc_url.contains("/demo") {
                    tracing::warn!("Using demo RPC endpoint for {}, set ALCHEMY_API_KEY environment variable for better reliability", network_name);
                }
            }
        }

        if let Ok(private_key) = std::env::var("STATE_ENGINE_PRIVATE_KEY") {
            tracing::info!("Using STATE_ENGINE_PRIVATE_KEY for local signing");
            self.engine.private_key = Some(private_key);
        }
    }

    /// Resolve the engine options for `network`. The default account falls
    /// back to the address of the configured private key.
    pub fn engine_settings(&self, network: &str) -> Result<EngineSettings> {
        let network_config = self.network(network)?;
        let engine = &self.engine;

        let mut default_account =
            parse_optional_address("default_account", engine.default_account.as_deref())?;
        if let Some(private_key) = &engine.private_key {
            let key_address = signer::parse_private_key(private_key)?.address();
            match default_account {
                Some(account) if account != key_address => tracing::warn!(
                    "default_account {:?} differs from the private key address {:?}",
                    account,
                    key_address
                ),
                Some(_) => {}
                None => default_account = Some(key_address),
            }
        }

        Ok(EngineSettings {
            contract_label: engine.contract_label.clone(),
            default_account,
            default_send: SendOptions {
                from: parse_optional_address(
                    "default_send.from",
                    engine.default_send.from.as_deref(),
                )?,
                gas_limit: engine.default_send.gas_limit,
                gas_price: engine.default_send.gas_price.map(u128::from),
            },
            private_key: engine.private_key.clone(),
            origin_block: engine.origin_block,
            gas_limit: engine
                .gas_limit
                .or(network_config.gas.default_gas_limit)
                .unwrap_or(DEFAULT_GAS_LIMIT),
            max_gas_price: network_config.gas.max_gas_price.map(u128::from),
            chain_id: Some(network_config.chain_id),
            receipt_poll_interval: Duration::from_millis(engine.receipt_poll_interval_ms),
            max_receipt_attempts: engine.max_receipt_attempts,
            settle_delay: Duration::from_millis(engine.settle_delay_ms),
        })
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-state-engine").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# Contract state engine configuration

# Network used when --network is not given
default_network = "local"

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
max_gas_price = 50_000_000_000  # 50 Gwei

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
max_gas_price = 20_000_000_000  # 20 Gwei

[security]
# Required for the send subcommand
allow_write_operations = false

[engine]
contract_label = "token"
# address = "0x..."
# abi_path = "artifacts/Token.json"
# deployment_path = "deployments/token.json"
# default_account = "0x..."
origin_block = 0
# gas_limit = 4712388
receipt_poll_interval_ms = 1000
max_receipt_attempts = 20000
settle_delay_ms = 15000

[engine.default_send]
# from = "0x..."
# gas_limit = 200000
# gas_price = 1_000_000_000

# Environment variables that can be used:
# ALCHEMY_API_KEY - replaces YOUR_API_KEY_HERE above
# ETHERSCAN_API_KEY - explorer key for remote ABI resolution
# STATE_ENGINE_PRIVATE_KEY - sign sends locally with this key
"#;
        sample_config.to_string()
    }
}
