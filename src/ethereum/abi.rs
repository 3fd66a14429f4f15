use alloy::json_abi::JsonAbi;
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredKind {
    Function,
    Event,
}

/// A function or event as it appears in the interface JSON. Overloads
/// appear once per declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredItem {
    pub kind: DeclaredKind,
    pub name: String,
}

/// Interface description plus the order its functions and events were
/// declared in. `JsonAbi` alone keys members by name.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescriptor {
    abi: JsonAbi,
    order: Vec<DeclaredItem>,
}

impl InterfaceDescriptor {
    /// Parse a bare ABI array, keeping declaration order.
    pub fn from_value(value: Value) -> Result<Self> {
        let order = declaration_order(&value);
        let abi = serde_json::from_value(value)
            .map_err(|e| anyhow!("Failed to parse ABI JSON: {}", e))?;
        Ok(Self { abi, order })
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn order(&self) -> &[DeclaredItem] {
        &self.order
    }

    pub fn into_abi(self) -> JsonAbi {
        self.abi
    }
}

/// Without the source JSON, functions come first, then events, each
/// alphabetically.
impl From<JsonAbi> for InterfaceDescriptor {
    fn from(abi: JsonAbi) -> Self {
        let functions = abi.functions().map(|f| DeclaredItem {
            kind: DeclaredKind::Function,
            name: f.name.clone(),
        });
        let events = abi.events().map(|e| DeclaredItem {
            kind: DeclaredKind::Event,
            name: e.name.clone(),
        });
        let order = functions.chain(events).collect();
        Self { abi, order }
    }
}

fn declaration_order(value: &Value) -> Vec<DeclaredItem> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            // Items without a type are functions.
            let kind = match item.get("type").and_then(Value::as_str).unwrap_or("function") {
                "function" => DeclaredKind::Function,
                "event" => DeclaredKind::Event,
                _ => return None,
            };
            let name = item.get("name").and_then(Value::as_str)?;
            Some(DeclaredItem {
                kind,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Parse an interface description from JSON text. Accepts a bare ABI array
/// or a build artifact object carrying an `abi` field.
pub fn parse_interface(json: &str) -> Result<InterfaceDescriptor> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| anyhow!("Interface is not valid JSON: {}", e))?;

    let abi = match value {
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| anyhow!("Interface object has no 'abi' field"))?,
        other => other,
    };

    InterfaceDescriptor::from_value(abi)
}

/// Read an interface description from a local file.
pub async fn load_interface_file<P: AsRef<Path>>(path: P) -> Result<InterfaceDescriptor> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read interface file {:?}: {}", path, e))?;
    parse_interface(&content)
}

/// Explorer lookup configuration
#[derive(Debug, Clone)]
pub struct AbiSource {
    pub etherscan_api_key: Option<String>,
    pub cache_dir: PathBuf,
}

impl Default for AbiSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("contract-state-engine")
            .join("abi-cache");

        Self {
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            cache_dir,
        }
    }
}

/// Resolves interfaces of verified contracts from a block explorer, caching
/// them in memory and on disk.
#[derive(Debug)]
pub struct AbiResolver {
    client: Client,
    config: AbiSource,
    memory_cache: HashMap<String, InterfaceDescriptor>,
}

impl AbiResolver {
    pub fn new(config: AbiSource) -> Self {
        Self {
            client: Client::new(),
            config,
            memory_cache: HashMap::new(),
        }
    }

    fn cache_key(address: &str, network: &str) -> String {
        format!("{}_{}", network, address.to_lowercase())
    }

    /// Get ABI for a contract, trying cache first, then the explorer
    pub async fn get_abi(&mut self, address: &str, network: &str) -> Result<InterfaceDescriptor> {
        let cache_key = Self::cache_key(address, network);

        if let Some(abi) = self.memory_cache.get(&cache_key) {
            debug!("ABI cache hit for {}", address);
            return Ok(abi.clone());
        }

        if let Ok(abi) = self.load_cached_abi(&cache_key).await {
            debug!("ABI disk cache hit for {}", address);
            self.memory_cache.insert(cache_key, abi.clone());
            return Ok(abi);
        }

        info!("Fetching ABI from explorer for {}", address);
        let raw = self.fetch_from_explorer(address, network).await?;
        let abi = parse_interface(&raw)?;

        // Cached verbatim so declaration order survives.
        if let Err(e) = self.cache_abi(&cache_key, &raw).await {
            warn!("Failed to cache ABI for {}: {}", address, e);
        }

        self.memory_cache.insert(cache_key, abi.clone());
        Ok(abi)
    }

    async fn fetch_from_explorer(&self, address: &str, network: &str) -> Result<String> {
        let base_url = match network {
            "mainnet" | "ethereum" => "https://api.etherscan.io",
            "sepolia" => "https://api-sepolia.etherscan.io",
            "polygon" => "https://api.polygonscan.com",
            "arbitrum" => "https://api.arbiscan.io",
            "optimism" => "https://api-optimistic.etherscan.io",
            other => return Err(anyhow!("No explorer known for network '{}'", other)),
        };

        let mut url = format!(
            "{}/api?module=contract&action=getabi&address={}&format=json",
            base_url, address
        );
        if let Some(api_key) = &self.config.etherscan_api_key {
            url.push_str(&format!("&apikey={}", api_key));
        }

        let response: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach explorer: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse explorer response: {}", e))?;

        if response["status"] != "1" {
            let message = response["result"]
                .as_str()
                .or_else(|| response["message"].as_str())
                .unwrap_or("Unknown error");
            return Err(anyhow!("Explorer API error: {}", message));
        }

        response["result"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No ABI found in response"))
    }

    async fn load_cached_abi(&self, cache_key: &str) -> Result<InterfaceDescriptor> {
        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        load_interface_file(&cache_path).await
    }

    async fn cache_abi(&self, cache_key: &str, raw: &str) -> Result<()> {
        fs::create_dir_all(&self.config.cache_dir)
            .await
            .map_err(|e| anyhow!("Failed to create cache directory: {}", e))?;

        let cache_path = self.config.cache_dir.join(format!("{}.json", cache_key));
        fs::write(&cache_path, raw)
            .await
            .map_err(|e| anyhow!("Failed to write cache file: {}", e))?;

        debug!("Cached ABI to {:?}", cache_path);
        Ok(())
    }
}
