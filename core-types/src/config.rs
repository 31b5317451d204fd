// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::path::PathBuf;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Config structure with the engine's key knobs.
///
/// The data root is always explicit; there is no process-wide default path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub root: PathBuf,
    /// Accepted symbol vocabulary; anything else is rejected before I/O.
    pub symbols: Vec<String>,
    pub build_version: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub write_retry: WriteRetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_handles: usize,
    pub idle_timeout_s: u64,
    pub sweep_interval_s: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_handles: 20,
            idle_timeout_s: 30 * 60,
            sweep_interval_s: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub chain_entries: usize,
    pub chain_ttl_s: u64,
    pub bars_entries: usize,
    pub bars_ttl_s: u64,
    pub spot_entries: usize,
    pub spot_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chain_entries: 256,
            chain_ttl_s: 15 * 60,
            bars_entries: 256,
            bars_ttl_s: 5 * 60,
            spot_entries: 1024,
            spot_ttl_s: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            jitter_pct: 0.2,
        }
    }
}

pub const DEFAULT_SYMBOLS: &[&str] = &["SPX", "XSP", "VIX", "QQQ", "GLD", "USO"];

impl EngineConfig {
    /// Defaults for everything but the root, which is always explicit.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            build_version: env!("CARGO_PKG_VERSION").to_string(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            write_retry: WriteRetryConfig::default(),
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("ALPHA"))
            .build()?;
        settings.try_deserialize()
    }
}
