//! # Hashwatt Core - Power Ratio Optimizer
//!
//! Pure engine that answers "at which power-scaling ratio should this
//! miner run?" for one machine or for a whole site sharing a tiered
//! electricity budget.
//!
//! ## Architecture
//!
//! ```text
//! SiteAllocator ──(per template)──→ RatioOptimizer
//!       │                              ├── EfficiencyCurve (interpolation)
//!       │                              ├── RewardSource   (coins, sats, revenue)
//!       │                              └── TariffRates    (tiered cost)
//!       └── TierLedger fold (efficiency order) → totals
//! ```
//!
//! Every economic figure is an `Option<Decimal>`: a price, reward rate or
//! tariff that is not known makes the dependent figures unknown, never zero.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hashwatt_core::{EfficiencyCurve, MachineCurve, RatioOptimizer, EconomicContext, Objective};
//!
//! let lookup = MachineCurve::new(curve, spec.nominal_power_watts);
//! let optimizer = RatioOptimizer::new(&lookup, &context);
//! let best = optimizer.optimize(Objective::Profit)?;
//! println!("run at {} -> {:?}/day", best.evaluation.ratio, best.evaluation.daily_profit);
//! ```

pub mod curve;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod provider;
pub mod revenue;
pub mod service;
pub mod site;
pub mod tariff;

pub use curve::{CurveSample, EfficiencyCurve, EfficiencyLookup, MachineCurve, OperatingPoint};
pub use error::{DataGap, EngineError, Result};
pub use model::{
    AppliedRatio, ElectricityTariff, InstanceId, MachineId, MachineInstance, MachineSpec,
    MarketQuote, NetworkStats, RatioKind, RewardConfig, Site, SiteId,
};
pub use optimizer::{
    AvailableRatios, Coverage, EconomicContext, GridSpec, Objective, OptimizationResult,
    RatioEvaluation, RatioOptimizer, Selection,
};
pub use provider::{
    CurveStore, MachineCatalog, MarketQuoteProvider, RatioStore, SiteDirectory, TariffProvider,
};
pub use revenue::{RevenueEstimate, RewardSource};
pub use service::{
    PowerPoint, ProfitabilityService, RatioAnalysis, RatioApplication, RatioTarget, SiteStatistics,
};
pub use site::{
    SiteAllocationResult, SiteAllocator, SiteMachine, SiteTotals, SkippedUnit, TierSummary,
    UnitAllocation,
};
pub use tariff::{CostBreakdown, TariffRates, TierLedger};

pub use rust_decimal::Decimal;

/// Fixed grid and unit constants shared by every component.
pub mod constants {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Lowest scaling ratio the optimizer will ever return
    pub const RATIO_MIN: Decimal = dec!(0.50);

    /// Highest scaling ratio the optimizer will ever return
    pub const RATIO_MAX: Decimal = dec!(1.50);

    /// Stage 1 step (21 points over the domain)
    pub const COARSE_STEP: Decimal = dec!(0.05);

    /// Stage 2 step
    pub const FINE_STEP: Decimal = dec!(0.01);

    /// Half-width of the stage 2 window around the stage 1 pick
    pub const FINE_WINDOW: Decimal = dec!(0.10);

    /// Billing period used for daily figures
    pub const HOURS_PER_DAY: Decimal = dec!(24);

    /// 1 BTC = 100,000,000 sats
    pub const SATS_PER_COIN: Decimal = dec!(100000000);

    pub const WATTS_PER_KILOWATT: Decimal = dec!(1000);
}
