//! Runtime configuration
//!
//! Everything is optional with documented fallbacks. The one setting that
//! changes behavior rather than tuning it is the marketplace contract
//! address: when it cannot be resolved (neither from the environment nor
//! from the Hardhat Ignition deployments file) the service runs in
//! cache-only mode, serving the persisted snapshot without any chain
//! interaction.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use tracing::warn;

const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
const DEFAULT_DEPLOYMENTS_FILE: &str = "ignition/deployments/chain-11155111/deployed_addresses.json";
const MARKETPLACE_DEPLOYMENT_KEY: &str = "DeployAll#Step06_Deploy_Marketplace";

#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Marketplace contract address. None switches the engine into
    /// cache-only mode; this is a supported degraded mode, not a failure.
    pub marketplace_address: Option<Address>,
    /// Ethereum JSON-RPC endpoint.
    pub rpc_url: String,
    /// First block of the historical backfill sweep.
    pub sync_from_block: u64,
    /// Marketplace snapshot file.
    pub snapshot_path: PathBuf,
    /// Leaderboard store file.
    pub leaderboard_path: PathBuf,
    /// Interval between live event tail polls (ms).
    pub poll_interval_ms: u64,
    /// HTTP listen port.
    pub port: u16,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            marketplace_address: None,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            sync_from_block: 0,
            snapshot_path: PathBuf::from("storage/marketplace.json"),
            leaderboard_path: PathBuf::from("storage/leaderboard.json"),
            poll_interval_ms: 5_000,
            port: 4100,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.marketplace_address = resolve_marketplace_address();

        if let Ok(v) = env::var("SEPOLIA_RPC_URL").or_else(|_| env::var("RPC_URL")) {
            if !v.trim().is_empty() {
                cfg.rpc_url = v;
            }
        }
        if let Ok(v) = env::var("MARKETPLACE_SYNC_FROM_BLOCK") {
            match v.parse() {
                Ok(block) => cfg.sync_from_block = block,
                Err(_) => warn!(value = %v, "invalid MARKETPLACE_SYNC_FROM_BLOCK, using default"),
            }
        }
        if let Ok(v) = env::var("MARKETPLACE_STORAGE_PATH") {
            if !v.trim().is_empty() {
                cfg.snapshot_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("LEADERBOARD_STORAGE_PATH") {
            if !v.trim().is_empty() {
                cfg.leaderboard_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("CHAIN_POLL_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                cfg.poll_interval_ms = ms;
            }
        }
        if let Ok(v) = env::var("PORT") {
            if let Ok(port) = v.parse() {
                cfg.port = port;
            }
        }

        cfg
    }
}

/// `MARKETPLACE_ADDRESS` wins; otherwise fall back to the address recorded
/// by the deployment scripts in the Ignition deployments file.
fn resolve_marketplace_address() -> Option<Address> {
    if let Ok(raw) = env::var("MARKETPLACE_ADDRESS") {
        match raw.parse() {
            Ok(address) => return Some(address),
            Err(_) => warn!(value = %raw, "invalid MARKETPLACE_ADDRESS, ignoring"),
        }
    }

    let deployments = env::var("DEPLOYMENTS_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DEPLOYMENTS_FILE));
    resolve_deployment_address(&deployments, MARKETPLACE_DEPLOYMENT_KEY)
}

/// Looks up one contract address in a Hardhat Ignition
/// `deployed_addresses.json` map. Missing or malformed files resolve to
/// None rather than failing startup.
pub fn resolve_deployment_address(path: &Path, key: &str) -> Option<Address> {
    let raw = std::fs::read_to_string(path).ok()?;
    let deployments: HashMap<String, String> = match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed deployments file, ignoring");
            return None;
        }
    };
    deployments.get(key)?.parse().ok()
}
