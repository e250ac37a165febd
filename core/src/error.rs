use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{InstanceId, MachineId, SiteId};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Structural failures. Missing market or tariff data is not an error,
/// see [`DataGap`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Target power for this ratio falls outside the sampled curve
    #[error("ratio {ratio} is not supported by the efficiency curve")]
    RatioNotSupported { ratio: Decimal },

    #[error("ratio {ratio} is outside the operating domain [{min}, {max}]")]
    RatioOutOfDomain { ratio: Decimal, min: Decimal, max: Decimal },

    /// No grid ratio interpolates for this machine
    #[error("no ratio in the operating domain is interpolatable for machine {machine}")]
    NoValidRatio { machine: MachineId },

    #[error("machine {0} not found")]
    MachineNotFound(MachineId),

    #[error("site {0} not found")]
    SiteNotFound(SiteId),

    #[error("machine instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("invalid efficiency curve: {0}")]
    InvalidCurve(String),

    #[error("invalid electricity tariff: {0}")]
    InvalidTariff(String),

    /// The ratio store refused or failed to persist a ratio
    #[error("ratio store error: {0}")]
    Store(String),
}

/// Upstream inputs that were unavailable for a computation. Each gap
/// leaves the dependent figures undefined instead of aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataGap {
    /// Coin price unknown (missing market data)
    Price,
    /// FPPS reward rate unknown (missing market data)
    RewardRate,
    /// Block reward or network difficulty unknown for an accepted-shares machine
    NetworkStats,
    /// Tier rates or tier-1 limit unknown (missing tariff config)
    Tariff,
}

impl std::fmt::Display for DataGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataGap::Price => write!(f, "coin price unavailable"),
            DataGap::RewardRate => write!(f, "FPPS reward rate unavailable"),
            DataGap::NetworkStats => write!(f, "network block reward/difficulty unavailable"),
            DataGap::Tariff => write!(f, "electricity tariff unavailable"),
        }
    }
}
