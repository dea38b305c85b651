use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use shared::domain::{Address, BlockNumber};
use tracing::warn;
use url::Url;

pub const SETTINGS_FILE: &str = "voting.toml";

const GOERLI_CONTRACT_ADDRESS: &str = "0x07EBB62Be83F68e3141abBe2F8eBF9ba8D43B582";
const GOERLI_DEPLOY_BLOCK: u64 = 9_285_292;
const LOCALHOST_RPC_URL: &str = "http://127.0.0.1:8545";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Localhost,
    Goerli,
}

impl Network {
    pub fn chain_id(self) -> u64 {
        match self {
            Self::Localhost => 31337,
            Self::Goerli => 5,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Localhost => f.write_str("localhost"),
            Self::Goerli => f.write_str("goerli"),
        }
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "localhost" | "hardhat" => Ok(Self::Localhost),
            "goerli" => Ok(Self::Goerli),
            other => Err(anyhow!("unknown network `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub network: Network,
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub deploy_block: u64,
}

impl Settings {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Localhost => Self {
                network,
                rpc_url: LOCALHOST_RPC_URL.into(),
                chain_id: network.chain_id(),
                contract_address: String::new(),
                deploy_block: 0,
            },
            // No public endpoint is assumed; RPC_URL has to be supplied.
            Network::Goerli => Self {
                network,
                rpc_url: String::new(),
                chain_id: network.chain_id(),
                contract_address: GOERLI_CONTRACT_ADDRESS.into(),
                deploy_block: GOERLI_DEPLOY_BLOCK,
            },
        }
    }

    pub fn contract_settings(&self) -> anyhow::Result<ContractSettings> {
        if self.contract_address.trim().is_empty() {
            return Err(anyhow!(
                "contract address is not configured for network {}",
                self.network
            ));
        }
        let contract = Address::parse(&self.contract_address)
            .with_context(|| format!("invalid contract address for network {}", self.network))?;

        if self.rpc_url.trim().is_empty() {
            return Err(anyhow!("rpc url is not configured for network {}", self.network));
        }
        let rpc_url = Url::parse(self.rpc_url.trim())
            .with_context(|| format!("invalid rpc url '{}'", self.rpc_url))?;
        if !matches!(rpc_url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(anyhow!("unsupported rpc url scheme '{}'", rpc_url.scheme()));
        }

        Ok(ContractSettings {
            contract,
            deploy_block: BlockNumber(self.deploy_block),
            rpc_url,
            chain_id: self.chain_id,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_network(Network::Goerli)
    }
}

/// Validated view of [`Settings`] handed to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSettings {
    pub contract: Address,
    pub deploy_block: BlockNumber,
    pub rpc_url: Url,
    pub chain_id: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    network: Option<String>,
    rpc_url: Option<String>,
    chain_id: Option<u64>,
    contract_address: Option<String>,
    deploy_block: Option<u64>,
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults for the selected network, then the settings file, then the environment.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let file_cfg = read_file_settings(path);

    let network = first_of(&env, &["APP__NETWORK"])
        .and_then(|raw| parse_network("APP__NETWORK", &raw))
        .or_else(|| {
            file_cfg
                .network
                .as_deref()
                .and_then(|raw| parse_network(&path.display().to_string(), raw))
        })
        .unwrap_or(Network::Goerli);

    let mut settings = Settings::for_network(network);

    if let Some(v) = file_cfg.rpc_url {
        settings.rpc_url = v;
    }
    if let Some(v) = file_cfg.chain_id {
        settings.chain_id = v;
    }
    if let Some(v) = file_cfg.contract_address {
        settings.contract_address = v;
    }
    if let Some(v) = file_cfg.deploy_block {
        settings.deploy_block = v;
    }

    if let Some(v) = first_of(&env, &["APP__RPC_URL", "RPC_URL"]) {
        settings.rpc_url = v;
    }
    if let Some(v) = first_of(&env, &["APP__CONTRACT_ADDRESS", "VOTING_CONTRACT_ADDRESS"]) {
        settings.contract_address = v;
    }
    if let Some(v) = first_of(&env, &["APP__DEPLOY_BLOCK"]) {
        match v.trim().parse::<u64>() {
            Ok(parsed) => settings.deploy_block = parsed,
            Err(err) => warn!("settings: ignoring APP__DEPLOY_BLOCK={v}: {err}"),
        }
    }
    if let Some(v) = first_of(&env, &["APP__CHAIN_ID"]) {
        match v.trim().parse::<u64>() {
            Ok(parsed) => settings.chain_id = parsed,
            Err(err) => warn!("settings: ignoring APP__CHAIN_ID={v}: {err}"),
        }
    }

    settings
}

fn parse_network(source: &str, raw: &str) -> Option<Network> {
    match raw.parse::<Network>() {
        Ok(network) => Some(network),
        Err(err) => {
            warn!("settings: ignoring network from {source}: {err}");
            None
        }
    }
}

fn read_file_settings(path: &Path) -> FileSettings {
    let Ok(raw) = fs::read_to_string(path) else {
        return FileSettings::default();
    };
    match toml::from_str::<FileSettings>(&raw) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!("settings: ignoring unreadable {}: {err}", path.display());
            FileSettings::default()
        }
    }
}

fn first_of(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env(key))
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
