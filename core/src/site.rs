//! Site allocator
//!
//! Every template on a site is expanded into its individual units. Units are
//! ordered by nominal efficiency so the most efficient hardware draws the
//! cheap tier-1 kWh first. Each distinct template is optimized once against
//! the full tier-1 budget; only the cost fold afterwards is sequential.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::curve::{EfficiencyCurve, MachineCurve};
use crate::error::{DataGap, EngineError, Result};
use crate::model::{ElectricityTariff, InstanceId, MachineId, MachineSpec, MarketQuote};
use crate::optimizer::{
    Coverage, EconomicContext, GridSpec, Objective, OptimizationResult, RatioEvaluation,
    RatioOptimizer, Selection,
};
use crate::revenue::RewardSource;
use crate::tariff::{TariffRates, TierLedger};

/// One machine template deployed on a site
#[derive(Debug, Clone)]
pub struct SiteMachine {
    pub spec: MachineSpec,
    pub curve: EfficiencyCurve,
    pub quantity: u32,
    pub custom_name: Option<String>,
    pub instance_id: Option<InstanceId>,
}

impl SiteMachine {
    pub fn new(spec: MachineSpec, curve: EfficiencyCurve, quantity: u32) -> Self {
        Self {
            spec,
            curve,
            quantity,
            custom_name: None,
            instance_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.spec.model)
    }
}

/// One unit after the tier fold. Cost and profit reflect the budget left
/// when this unit was billed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAllocation {
    pub name: String,
    pub machine_id: MachineId,
    pub instance_id: Option<InstanceId>,
    #[serde(flatten)]
    pub evaluation: RatioEvaluation,
    pub tier1_kwh: Option<Decimal>,
    pub tier2_kwh: Option<Decimal>,
    pub coverage: Coverage,
    pub selection: Selection,
}

/// Unit left out because its curve covers no ratio in the domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub name: String,
    pub machine_id: MachineId,
    pub instance_id: Option<InstanceId>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSummary {
    pub limit_kwh: Option<Decimal>,
    pub tier1_used_kwh: Decimal,
    pub tier2_used_kwh: Decimal,
    pub remaining_kwh: Option<Decimal>,
}

/// Sums over allocated units. A field is `None` when no allocated unit had a
/// defined value for it or every unit was skipped; a site with no units sums
/// to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTotals {
    pub unit_count: usize,
    pub skipped_count: usize,
    pub effective_hashrate_th: Decimal,
    pub power_watts: Decimal,
    pub daily_revenue: Option<Decimal>,
    pub daily_electricity_cost: Option<Decimal>,
    pub daily_profit: Option<Decimal>,
    pub sats_per_hour: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAllocationResult {
    pub objective: Objective,
    /// Units in billing order
    pub allocations: Vec<UnitAllocation>,
    pub skipped: Vec<SkippedUnit>,
    pub tier: TierSummary,
    pub totals: SiteTotals,
    pub coverage: Coverage,
    pub gaps: Vec<DataGap>,
}

impl SiteAllocationResult {
    /// Recompute totals and coverage from `allocations` and `skipped`.
    ///
    /// A site whose units were all skipped has unknown economics, not zero;
    /// only a site with no units at all sums to zero.
    pub fn refresh_totals(&mut self) {
        let skipped = self.skipped.len();
        let allocations = &self.allocations;

        self.totals = SiteTotals {
            unit_count: allocations.len(),
            skipped_count: skipped,
            effective_hashrate_th: allocations.iter().map(|a| a.evaluation.effective_hashrate_th).sum(),
            power_watts: allocations.iter().map(|a| a.evaluation.power_watts).sum(),
            daily_revenue: sum_defined(allocations, skipped, |e| e.daily_revenue),
            daily_electricity_cost: sum_defined(allocations, skipped, |e| e.daily_electricity_cost),
            daily_profit: sum_defined(allocations, skipped, |e| e.daily_profit),
            sats_per_hour: sum_defined(allocations, skipped, |e| e.sats_per_hour),
        };

        let costed = if allocations.is_empty() {
            skipped == 0 && self.gaps.is_empty()
        } else {
            allocations.iter().all(|a| a.coverage == Coverage::FullyCosted)
        };
        self.coverage = if costed {
            Coverage::FullyCosted
        } else {
            Coverage::TechnicalOnly
        };
    }
}

struct Unit<'a> {
    template: usize,
    index: u32,
    machine: &'a SiteMachine,
}

#[derive(Debug, Clone, Default)]
pub struct SiteAllocator {
    grid: GridSpec,
}

impl SiteAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grid(grid: GridSpec) -> Self {
        Self { grid }
    }

    pub fn allocate(
        &self,
        machines: &[SiteMachine],
        tariff: &ElectricityTariff,
        quote: &MarketQuote,
        objective: Objective,
    ) -> Result<SiteAllocationResult> {
        let rates = tariff.rates()?;

        let mut units: Vec<Unit<'_>> = machines
            .iter()
            .enumerate()
            .flat_map(|(template, machine)| {
                (1..=machine.quantity).map(move |index| Unit { template, index, machine })
            })
            .collect();
        // stable: equal efficiency keeps template order
        units.sort_by(|a, b| {
            b.machine
                .spec
                .nominal_efficiency()
                .cmp(&a.machine.spec.nominal_efficiency())
        });

        let optimized = self.optimize_templates(machines, rates, quote, objective);

        let mut ledger = TierLedger::new(rates);
        let mut allocations = Vec::with_capacity(units.len());
        let mut skipped = Vec::new();

        for unit in &units {
            let name = format!("{} #{}", unit.machine.display_name(), unit.index);
            let machine_id = unit.machine.spec.id;
            let instance_id = unit.machine.instance_id;

            match &optimized[unit.template] {
                Ok(result) => {
                    let bill = ledger.bill(result.evaluation.power_watts);
                    let mut evaluation = result.evaluation.clone();
                    evaluation.daily_electricity_cost = bill.map(|b| b.cost);
                    evaluation.daily_profit = evaluation
                        .daily_revenue
                        .zip(evaluation.daily_electricity_cost)
                        .map(|(revenue, cost)| revenue - cost);

                    debug!(
                        "{}: ratio {} cost {:?} remaining tier-1 {}",
                        name,
                        evaluation.ratio,
                        evaluation.daily_electricity_cost,
                        ledger.remaining_tier1_kwh()
                    );

                    let coverage = if evaluation.daily_profit.is_some() {
                        Coverage::FullyCosted
                    } else {
                        Coverage::TechnicalOnly
                    };
                    allocations.push(UnitAllocation {
                        name,
                        machine_id,
                        instance_id,
                        evaluation,
                        tier1_kwh: bill.map(|b| b.tier1_kwh),
                        tier2_kwh: bill.map(|b| b.tier2_kwh),
                        coverage,
                        selection: result.selection,
                    });
                }
                Err(EngineError::NoValidRatio { .. }) => {
                    skipped.push(SkippedUnit {
                        name,
                        machine_id,
                        instance_id,
                        reason: "no interpolatable ratio in the operating domain".to_string(),
                    });
                }
                Err(e) => return Err(e.clone()),
            }
        }

        let mut gaps: Vec<DataGap> = machines
            .iter()
            .flat_map(|m| RewardSource::for_machine(&m.spec).gaps(quote))
            .collect();
        if rates.is_none() {
            gaps.push(DataGap::Tariff);
        }
        gaps.sort();
        gaps.dedup();

        let tier = TierSummary {
            limit_kwh: rates.map(|r| r.tier1_daily_kwh_limit),
            tier1_used_kwh: ledger.tier1_kwh(),
            tier2_used_kwh: ledger.tier2_kwh(),
            remaining_kwh: rates.map(|_| ledger.remaining_tier1_kwh()),
        };

        let mut result = SiteAllocationResult {
            objective,
            allocations,
            skipped,
            tier,
            totals: SiteTotals::default(),
            coverage: Coverage::TechnicalOnly,
            gaps,
        };
        result.refresh_totals();

        info!(
            "Site allocation ({}): {} units, {} skipped, profit {:?}",
            objective, result.totals.unit_count, result.totals.skipped_count, result.totals.daily_profit
        );
        Ok(result)
    }

    /// One optimization per template, each against the full tier-1 budget
    fn optimize_templates(
        &self,
        machines: &[SiteMachine],
        rates: Option<TariffRates>,
        quote: &MarketQuote,
        objective: Objective,
    ) -> Vec<Result<OptimizationResult>> {
        let run = |machine: &SiteMachine| {
            let context = EconomicContext::new(quote.clone(), RewardSource::for_machine(&machine.spec), rates);
            let lookup = MachineCurve::new(machine.curve.clone(), machine.spec.nominal_power_watts);
            let result = RatioOptimizer::new(&lookup, &context)
                .for_machine(machine.spec.id)
                .with_grid(self.grid)
                .optimize(objective);
            if let Err(e) = &result {
                warn!("Skipping {} (machine {}): {}", machine.display_name(), machine.spec.id, e);
            }
            result
        };

        #[cfg(feature = "parallel")]
        let results = {
            use rayon::prelude::*;
            machines.par_iter().map(run).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results = machines.iter().map(run).collect();

        results
    }
}

fn sum_defined<F>(allocations: &[UnitAllocation], skipped: usize, field: F) -> Option<Decimal>
where
    F: Fn(&RatioEvaluation) -> Option<Decimal>,
{
    if allocations.is_empty() {
        return (skipped == 0).then_some(Decimal::ZERO);
    }
    allocations
        .iter()
        .filter_map(|a| field(&a.evaluation))
        .fold(None, |acc, v| Some(acc.unwrap_or(Decimal::ZERO) + v))
}
