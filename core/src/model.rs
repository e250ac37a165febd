//! Value types consumed by the engine
//!
//! Records here are snapshots handed in by the surrounding application
//! (catalog, market feed, site configuration). The engine never mutates them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tariff::TariffRates;

pub type MachineId = u32;
pub type SiteId = u32;
pub type InstanceId = u32;

/// Catalog entry for a miner model at its nominal operating point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub id: MachineId,
    pub model: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// TH/s at ratio 1.0
    pub nominal_hashrate_th: Decimal,
    /// Watts at ratio 1.0
    pub nominal_power_watts: u32,
    #[serde(default)]
    pub reward: RewardConfig,
}

impl MachineSpec {
    pub fn new(id: MachineId, model: impl Into<String>, nominal_hashrate_th: Decimal, nominal_power_watts: u32) -> Self {
        Self {
            id,
            model: model.into(),
            manufacturer: None,
            nominal_hashrate_th,
            nominal_power_watts,
            reward: RewardConfig::default(),
        }
    }

    pub fn with_accepted_shares(mut self, accepted_shares_24h: Decimal) -> Self {
        self.reward.accepted_shares_24h = Some(accepted_shares_24h);
        self
    }

    /// Nominal TH/s per watt, zero for a machine without a nominal power
    pub fn nominal_efficiency(&self) -> Decimal {
        if self.nominal_power_watts == 0 {
            return Decimal::ZERO;
        }
        self.nominal_hashrate_th / Decimal::from(self.nominal_power_watts)
    }
}

/// Per-machine reward configuration. Accepted shares, when present, pin the
/// machine to the accepted-shares reward formula.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default)]
    pub accepted_shares_24h: Option<Decimal>,
}

/// Network figures used by the accepted-shares reward formula
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub block_reward: Option<Decimal>,
    #[serde(default)]
    pub network_difficulty: Option<Decimal>,
}

/// Latest market snapshot. Absent fields are unknown, not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketQuote {
    #[serde(default)]
    pub price_per_coin: Option<Decimal>,
    /// FPPS payout, coin per TH/s per day
    #[serde(default)]
    pub reward_rate_per_th_per_day: Option<Decimal>,
    #[serde(default)]
    pub network: Option<NetworkStats>,
}

impl MarketQuote {
    pub fn new(price_per_coin: Decimal, reward_rate_per_th_per_day: Decimal) -> Self {
        Self {
            price_per_coin: Some(price_per_coin),
            reward_rate_per_th_per_day: Some(reward_rate_per_th_per_day),
            network: None,
        }
    }

    /// Quote with every field unknown
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_network(mut self, block_reward: Decimal, network_difficulty: Decimal) -> Self {
        self.network = Some(NetworkStats {
            block_reward: Some(block_reward),
            network_difficulty: Some(network_difficulty),
        });
        self
    }
}

/// Two-tier site electricity schedule. Fields may be unconfigured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectricityTariff {
    #[serde(default)]
    pub tier1_rate: Option<Decimal>,
    #[serde(default)]
    pub tier2_rate: Option<Decimal>,
    #[serde(default)]
    pub tier1_daily_kwh_limit: Option<Decimal>,
}

impl ElectricityTariff {
    pub fn new(tier1_rate: Decimal, tier2_rate: Decimal, tier1_daily_kwh_limit: Decimal) -> Self {
        Self {
            tier1_rate: Some(tier1_rate),
            tier2_rate: Some(tier2_rate),
            tier1_daily_kwh_limit: Some(tier1_daily_kwh_limit),
        }
    }

    /// Validated rates, `Ok(None)` when any field is missing
    pub fn rates(&self) -> Result<Option<TariffRates>> {
        match (self.tier1_rate, self.tier2_rate, self.tier1_daily_kwh_limit) {
            (Some(t1), Some(t2), Some(limit)) => TariffRates::new(t1, t2, limit).map(Some),
            _ => Ok(None),
        }
    }
}

/// How a recorded operating ratio was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioKind {
    Manual,
    Optimal,
    Nominal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRatio {
    pub ratio: Decimal,
    pub kind: RatioKind,
}

/// A machine template deployed `quantity` times on a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInstance {
    pub id: InstanceId,
    pub site_id: SiteId,
    pub machine_id: MachineId,
    pub quantity: u32,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub applied: Option<AppliedRatio>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    #[serde(default)]
    pub instances: Vec<MachineInstance>,
}
