//! Tiered electricity cost model
//!
//! A site buys its first `tier1_daily_kwh_limit` kWh each day at the tier-1
//! rate and everything above that at the tier-2 rate. The tier-1 budget is
//! shared by every machine on the site, so billing is a sequential fold:
//! [`TierLedger`] carries the remaining budget from one unit to the next.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{HOURS_PER_DAY, WATTS_PER_KILOWATT};
use crate::error::{EngineError, Result};

/// kWh drawn at a constant `power_watts` over `hours`
pub fn daily_kwh(power_watts: Decimal, hours: Decimal) -> Decimal {
    power_watts * hours / WATTS_PER_KILOWATT
}

/// Validated tier rates (all non-negative)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffRates {
    pub tier1_rate: Decimal,
    pub tier2_rate: Decimal,
    pub tier1_daily_kwh_limit: Decimal,
}

/// Result of billing one consumer against the tier-1 budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub kwh: Decimal,
    pub tier1_kwh: Decimal,
    pub tier2_kwh: Decimal,
    pub cost: Decimal,
    /// Tier-1 budget left for the next consumer
    pub remaining_tier1_kwh: Decimal,
}

impl TariffRates {
    pub fn new(tier1_rate: Decimal, tier2_rate: Decimal, tier1_daily_kwh_limit: Decimal) -> Result<Self> {
        for (name, value) in [
            ("tier1_rate", tier1_rate),
            ("tier2_rate", tier2_rate),
            ("tier1_daily_kwh_limit", tier1_daily_kwh_limit),
        ] {
            if value < Decimal::ZERO {
                return Err(EngineError::InvalidTariff(format!("{} must be >= 0, got {}", name, value)));
            }
        }

        Ok(Self {
            tier1_rate,
            tier2_rate,
            tier1_daily_kwh_limit,
        })
    }

    /// Bill `power_watts` for `hours` given what is left of the tier-1 budget
    pub fn daily_cost(&self, power_watts: Decimal, hours: Decimal, remaining_tier1_kwh: Decimal) -> CostBreakdown {
        let kwh = daily_kwh(power_watts, hours);

        let (tier1_kwh, tier2_kwh, remaining) = if remaining_tier1_kwh <= Decimal::ZERO {
            (Decimal::ZERO, kwh, remaining_tier1_kwh)
        } else if kwh <= remaining_tier1_kwh {
            (kwh, Decimal::ZERO, remaining_tier1_kwh - kwh)
        } else {
            (remaining_tier1_kwh, kwh - remaining_tier1_kwh, Decimal::ZERO)
        };

        CostBreakdown {
            kwh,
            tier1_kwh,
            tier2_kwh,
            cost: tier1_kwh * self.tier1_rate + tier2_kwh * self.tier2_rate,
            remaining_tier1_kwh: remaining,
        }
    }
}

/// Sequential tier-1 budget accumulator for one site and one day.
///
/// Units must be billed in the order they are meant to consume the budget.
/// With no rates every bill is `None` and the ledger stays empty.
#[derive(Debug, Clone)]
pub struct TierLedger {
    rates: Option<TariffRates>,
    hours: Decimal,
    remaining_tier1_kwh: Decimal,
    tier1_kwh: Decimal,
    tier2_kwh: Decimal,
    cost: Decimal,
}

impl TierLedger {
    /// Fresh day: the full tier-1 limit is available
    pub fn new(rates: Option<TariffRates>) -> Self {
        Self::with_budget(rates, rates.map(|r| r.tier1_daily_kwh_limit).unwrap_or(Decimal::ZERO))
    }

    pub fn with_budget(rates: Option<TariffRates>, remaining_tier1_kwh: Decimal) -> Self {
        Self {
            rates,
            hours: HOURS_PER_DAY,
            remaining_tier1_kwh,
            tier1_kwh: Decimal::ZERO,
            tier2_kwh: Decimal::ZERO,
            cost: Decimal::ZERO,
        }
    }

    pub fn with_hours(mut self, hours: Decimal) -> Self {
        self.hours = hours;
        self
    }

    /// Bill one consumer and advance the budget
    pub fn bill(&mut self, power_watts: Decimal) -> Option<CostBreakdown> {
        let rates = self.rates?;
        let breakdown = rates.daily_cost(power_watts, self.hours, self.remaining_tier1_kwh);

        self.remaining_tier1_kwh = breakdown.remaining_tier1_kwh;
        self.tier1_kwh += breakdown.tier1_kwh;
        self.tier2_kwh += breakdown.tier2_kwh;
        self.cost += breakdown.cost;

        Some(breakdown)
    }

    pub fn rates(&self) -> Option<&TariffRates> {
        self.rates.as_ref()
    }

    pub fn remaining_tier1_kwh(&self) -> Decimal {
        self.remaining_tier1_kwh
    }

    pub fn tier1_kwh(&self) -> Decimal {
        self.tier1_kwh
    }

    pub fn tier2_kwh(&self) -> Decimal {
        self.tier2_kwh
    }

    /// Cumulative cost, `None` without rates
    pub fn total_cost(&self) -> Option<Decimal> {
        self.rates.map(|_| self.cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rates() -> TariffRates {
        TariffRates::new(dec!(0.073), dec!(0.089), dec!(40)).unwrap()
    }

    #[test]
    fn test_daily_kwh() {
        assert_eq!(daily_kwh(dec!(1250), dec!(24)), dec!(30));
    }

    #[test]
    fn test_fits_in_tier1() {
        let bill = rates().daily_cost(dec!(1250), HOURS_PER_DAY, dec!(40));
        assert_eq!(bill.cost, dec!(2.19));
        assert_eq!(bill.remaining_tier1_kwh, dec!(10));
        assert_eq!(bill.tier2_kwh, Decimal::ZERO);
    }

    #[test]
    fn test_split_across_tiers() {
        let bill = rates().daily_cost(dec!(1250), HOURS_PER_DAY, dec!(10));
        assert_eq!(bill.tier1_kwh, dec!(10));
        assert_eq!(bill.tier2_kwh, dec!(20));
        assert_eq!(bill.cost, dec!(2.51));
        assert_eq!(bill.remaining_tier1_kwh, Decimal::ZERO);
    }

    #[test]
    fn test_exhausted_budget_bills_tier2() {
        let bill = rates().daily_cost(dec!(1000), HOURS_PER_DAY, Decimal::ZERO);
        assert_eq!(bill.tier1_kwh, Decimal::ZERO);
        assert_eq!(bill.cost, dec!(24) * dec!(0.089));
    }

    #[test]
    fn test_negative_rate_rejected() {
        assert!(matches!(
            TariffRates::new(dec!(-0.01), dec!(0.089), dec!(40)),
            Err(EngineError::InvalidTariff(_))
        ));
    }

    #[test]
    fn test_ledger_folds_budget() {
        let mut ledger = TierLedger::new(Some(rates()));
        let a = ledger.bill(dec!(1250)).unwrap();
        let b = ledger.bill(dec!(1250)).unwrap();

        assert_eq!(a.cost, dec!(2.19));
        assert_eq!(b.cost, dec!(2.51));
        assert_eq!(ledger.tier1_kwh(), dec!(40));
        assert_eq!(ledger.tier2_kwh(), dec!(20));
        assert_eq!(ledger.total_cost(), Some(dec!(4.70)));
        assert_eq!(ledger.remaining_tier1_kwh(), Decimal::ZERO);
    }

    #[test]
    fn test_ledger_without_rates() {
        let mut ledger = TierLedger::new(None);
        assert_eq!(ledger.bill(dec!(1250)), None);
        assert_eq!(ledger.total_cost(), None);
    }
}
