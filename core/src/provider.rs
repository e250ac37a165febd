//! Capabilities the engine consumes from its host
//!
//! All calls are synchronous and resolve from whatever snapshot the host
//! holds. Refresh, retry and caching policy belong to the implementation.

use crate::curve::EfficiencyCurve;
use crate::error::Result;
use crate::model::{
    AppliedRatio, ElectricityTariff, InstanceId, MachineId, MachineInstance, MachineSpec,
    MarketQuote, Site, SiteId,
};

pub trait MachineCatalog: Send + Sync {
    fn machine(&self, id: MachineId) -> Option<MachineSpec>;
}

pub trait CurveStore: Send + Sync {
    /// Measured curve for a machine model, `None` when never measured
    fn curve(&self, machine: MachineId) -> Option<EfficiencyCurve>;
}

pub trait MarketQuoteProvider: Send + Sync {
    /// Latest snapshot; unknown fields stay `None`
    fn latest_quote(&self) -> MarketQuote;
}

pub trait TariffProvider: Send + Sync {
    /// Tariff used for single-machine projections
    fn default_tariff(&self) -> ElectricityTariff;

    /// Site-specific tariff, `None` to use the default
    fn site_tariff(&self, site: SiteId) -> Option<ElectricityTariff>;
}

pub trait SiteDirectory: Send + Sync {
    fn site(&self, id: SiteId) -> Option<Site>;

    fn instance(&self, id: InstanceId) -> Option<MachineInstance>;
}

pub trait RatioStore: Send + Sync {
    /// Persist the active operating ratio of every instance in `batch`.
    ///
    /// All or nothing: when any instance is rejected, none is recorded.
    fn record_ratios(&self, batch: &[(InstanceId, AppliedRatio)]) -> Result<()>;

    fn record_ratio(&self, instance: InstanceId, applied: AppliedRatio) -> Result<()> {
        self.record_ratios(&[(instance, applied)])
    }
}
