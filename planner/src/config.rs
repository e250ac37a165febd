//! Configuration for the hashwatt planner
//!
//! Built-in defaults, then an optional TOML file, then `HASHWATT_*`
//! environment overrides, then sanitising.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::market::MAX_QUOTE_AGE_SECS;

pub const DEFAULT_CONFIG_FILE: &str = "hashwatt.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub market: MarketConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// JSON file with machines, curves, sites and the default tariff
    pub path: PathBuf,
}

/// Static market quote and cache policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub price_per_coin: Option<Decimal>,
    /// FPPS payout, coin per TH/s per day
    pub reward_rate_per_th_per_day: Option<Decimal>,
    pub block_reward: Option<Decimal>,
    pub network_difficulty: Option<Decimal>,
    /// Serve the cached quote without refetching for this long
    pub quote_ttl_secs: u64,
    /// Serve a stale quote this long when a refetch fails
    pub quote_max_stale_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when RUST_LOG is unset
    pub level: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dataset.json"),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            price_per_coin: None,
            reward_rate_per_th_per_day: None,
            block_reward: None,
            network_difficulty: None,
            quote_ttl_secs: default_quote_ttl(),
            quote_max_stale_secs: default_quote_max_stale(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `HASHWATT_CONFIG` is
    /// tried, then `hashwatt.toml` in the working directory if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => match std::env::var("HASHWATT_CONFIG") {
                Ok(p) => Some(PathBuf::from(p)),
                Err(_) => {
                    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                    local.exists().then_some(local)
                }
            },
        };

        let mut cfg = match file {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.sanitise();
        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config TOML {}", path.display()))
    }

    /// Apply `HASHWATT_*` overrides read through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = var("HASHWATT_DATASET") {
            self.dataset.path = PathBuf::from(p);
        }
        if let Some(l) = var("HASHWATT_LOG") {
            self.logging.level = l;
        }
        if let Some(t) = var("HASHWATT_QUOTE_TTL_SECS") {
            self.market.quote_ttl_secs = t.parse().unwrap_or_else(|_| default_quote_ttl());
        }
        if let Some(t) = var("HASHWATT_QUOTE_MAX_STALE_SECS") {
            self.market.quote_max_stale_secs = t.parse().unwrap_or_else(|_| default_quote_max_stale());
        }
        if let Some(p) = var("HASHWATT_PRICE") {
            self.market.price_per_coin = Some(p.parse().with_context(|| format!("HASHWATT_PRICE is not a decimal: {}", p))?);
        }
        if let Some(r) = var("HASHWATT_FPPS_RATE") {
            self.market.reward_rate_per_th_per_day =
                Some(r.parse().with_context(|| format!("HASHWATT_FPPS_RATE is not a decimal: {}", r))?);
        }
        Ok(())
    }

    pub fn sanitise(&mut self) {
        if self.market.quote_ttl_secs == 0 {
            self.market.quote_ttl_secs = default_quote_ttl();
        }
        self.market.quote_ttl_secs = self.market.quote_ttl_secs.min(MAX_QUOTE_AGE_SECS);
        self.market.quote_max_stale_secs = self.market.quote_max_stale_secs.min(MAX_QUOTE_AGE_SECS);
        if self.market.quote_max_stale_secs < self.market.quote_ttl_secs {
            self.market.quote_max_stale_secs = self.market.quote_ttl_secs;
        }
        if self.logging.level.trim().is_empty() {
            self.logging.level = default_log_level();
        }
        // negative quotes are treated as unknown
        if self.market.price_per_coin.map_or(false, |p| p < Decimal::ZERO) {
            self.market.price_per_coin = None;
        }
        if self
            .market
            .reward_rate_per_th_per_day
            .map_or(false, |r| r < Decimal::ZERO)
        {
            self.market.reward_rate_per_th_per_day = None;
        }
    }
}

fn default_quote_ttl() -> u64 {
    300
}

fn default_quote_max_stale() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}
