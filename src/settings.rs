//! Subsystem configuration
//!
//! Loaded from an optional TOML file with `ESCROW_`-prefixed environment
//! overrides (e.g. `ESCROW_PROCESSOR__API_KEY`). Missing fields fall back
//! to defaults.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{error::EscrowError, EscrowResult};

/// Full configuration for the escrow subsystem
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Ledger behaviour knobs
    #[serde(default)]
    pub ledger: LedgerSettings,

    /// Processor endpoint and credentials
    #[serde(default)]
    pub processor: ProcessorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Platform fee withheld on release, in basis points (500 = 5%)
    #[serde(default = "default_fee_bps")]
    pub platform_fee_bps: u16,
    /// Upper bound on any single processor call, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,
    /// Number of recent webhook event ids kept for dedupe
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    /// Base URL of the processor API
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token for API calls
    #[serde(default)]
    pub api_key: String,
    /// Shared secret for webhook signatures
    #[serde(default)]
    pub webhook_secret: String,
}

fn default_fee_bps() -> u16 {
    500
}
fn default_gateway_timeout_secs() -> u64 {
    15
}
fn default_dedupe_window() -> usize {
    1024
}
fn default_api_url() -> String {
    "https://api.processor.example".into()
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            platform_fee_bps: default_fee_bps(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            dedupe_window: default_dedupe_window(),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            webhook_secret: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides
    pub fn load(path: Option<&str>) -> EscrowResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder
            .add_source(Environment::with_prefix("ESCROW").separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| EscrowError::config(err.to_string()))
    }

    /// Gateway call timeout as a duration
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.gateway_timeout_secs)
    }
}
