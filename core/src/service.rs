//! Profitability operations exposed to the host application
//!
//! Each call resolves its inputs from the injected providers once (one
//! market quote, one tariff) and then runs the pure engine over them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::curve::{ratio_for_power, EfficiencyCurve, MachineCurve};
use crate::error::{DataGap, EngineError, Result};
use crate::model::{
    AppliedRatio, ElectricityTariff, InstanceId, MachineId, MachineInstance, MachineSpec,
    MarketQuote, RatioKind, SiteId,
};
use crate::optimizer::{
    AvailableRatios, EconomicContext, GridSpec, Objective, OptimizationResult, RatioEvaluation,
    RatioOptimizer,
};
use crate::provider::{
    CurveStore, MachineCatalog, MarketQuoteProvider, RatioStore, SiteDirectory, TariffProvider,
};
use crate::revenue::RewardSource;
use crate::site::{SiteAllocationResult, SiteAllocator, SiteMachine, SkippedUnit};

/// Where a ratio is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioTarget {
    /// Every instance on the site
    Site(SiteId),
    Instance(InstanceId),
}

/// Per-ratio chart data for one machine, with the inputs it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioAnalysis {
    pub machine_id: MachineId,
    pub model: String,
    pub nominal_hashrate_th: Decimal,
    pub nominal_power_watts: u32,
    pub reward: RewardSource,
    pub quote: MarketQuote,
    pub tariff: ElectricityTariff,
    pub gaps: Vec<DataGap>,
    pub evaluations: Vec<RatioEvaluation>,
}

/// Operating point for an absolute power draw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerPoint {
    pub machine_id: MachineId,
    pub ratio: Decimal,
    pub power_watts: Decimal,
    pub effective_hashrate_th: Decimal,
    pub efficiency_th_per_watt: Decimal,
}

/// Nameplate totals for a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatistics {
    pub site_id: SiteId,
    pub name: String,
    pub instance_count: usize,
    pub unit_count: u64,
    pub nominal_hashrate_th: Decimal,
    pub nominal_power_watts: u64,
    pub nominal_efficiency_th_per_watt: Decimal,
    pub instances_with_ratio: usize,
    pub tariff: ElectricityTariff,
}

/// One recorded ratio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioApplication {
    pub instance_id: InstanceId,
    pub machine_id: MachineId,
    pub ratio: Decimal,
    pub kind: RatioKind,
}

pub struct ProfitabilityService {
    catalog: Arc<dyn MachineCatalog>,
    curves: Arc<dyn CurveStore>,
    quotes: Arc<dyn MarketQuoteProvider>,
    tariffs: Arc<dyn TariffProvider>,
    sites: Arc<dyn SiteDirectory>,
    ratios: Arc<dyn RatioStore>,
    grid: GridSpec,
}

impl ProfitabilityService {
    pub fn new(
        catalog: Arc<dyn MachineCatalog>,
        curves: Arc<dyn CurveStore>,
        quotes: Arc<dyn MarketQuoteProvider>,
        tariffs: Arc<dyn TariffProvider>,
        sites: Arc<dyn SiteDirectory>,
        ratios: Arc<dyn RatioStore>,
    ) -> Self {
        Self {
            catalog,
            curves,
            quotes,
            tariffs,
            sites,
            ratios,
            grid: GridSpec::default(),
        }
    }

    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = grid;
        self
    }

    /// Best ratio for one machine under the default tariff
    pub fn get_optimal_ratio(&self, machine: MachineId, objective: Objective) -> Result<OptimizationResult> {
        let (spec, lookup) = self.machine_curve(machine)?;
        let context = self.default_context(&spec)?;

        let result = RatioOptimizer::new(&lookup, &context)
            .for_machine(machine)
            .with_grid(self.grid)
            .optimize(objective)?;

        info!(
            "Optimal {} ratio for {} ({}): {} [{:?}]",
            objective, spec.model, machine, result.evaluation.ratio, result.coverage
        );
        Ok(result)
    }

    /// Figures at every interpolatable coarse ratio
    pub fn get_ratio_analysis(&self, machine: MachineId) -> Result<RatioAnalysis> {
        let (spec, lookup) = self.machine_curve(machine)?;
        let tariff = self.tariffs.default_tariff();
        let context = EconomicContext::new(self.quotes.latest_quote(), RewardSource::for_machine(&spec), tariff.rates()?);

        let evaluations = RatioOptimizer::new(&lookup, &context)
            .for_machine(machine)
            .with_grid(self.grid)
            .analyze();

        info!("Ratio analysis for {} ({}): {} points", spec.model, machine, evaluations.len());
        Ok(RatioAnalysis {
            machine_id: machine,
            model: spec.model,
            nominal_hashrate_th: spec.nominal_hashrate_th,
            nominal_power_watts: spec.nominal_power_watts,
            reward: context.reward,
            gaps: context.gaps(),
            quote: context.quote,
            tariff,
            evaluations,
        })
    }

    pub fn get_available_ratios(&self, machine: MachineId) -> Result<AvailableRatios> {
        let (spec, lookup) = self.machine_curve(machine)?;
        // economics do not affect which ratios interpolate
        let context = EconomicContext::new(MarketQuote::unknown(), RewardSource::for_machine(&spec), None);

        Ok(RatioOptimizer::new(&lookup, &context)
            .with_grid(self.grid)
            .available_ratios())
    }

    /// Figures at one ratio under the default tariff
    pub fn get_efficiency_at_ratio(&self, machine: MachineId, ratio: Decimal) -> Result<RatioEvaluation> {
        if !self.grid.contains(ratio) {
            return Err(EngineError::RatioOutOfDomain {
                ratio,
                min: self.grid.min,
                max: self.grid.max,
            });
        }
        let (spec, lookup) = self.machine_curve(machine)?;
        let context = self.default_context(&spec)?;

        RatioOptimizer::new(&lookup, &context)
            .for_machine(machine)
            .with_grid(self.grid)
            .evaluate(ratio)
            .ok_or(EngineError::RatioNotSupported { ratio })
    }

    /// Ratio and hashrate at an absolute power draw
    pub fn get_efficiency_at_power(&self, machine: MachineId, power_watts: Decimal) -> Result<PowerPoint> {
        let spec = self.machine(machine)?;
        let curve = self.curve(machine)?;

        let ratio = ratio_for_power(spec.nominal_power_watts, power_watts)
            .ok_or_else(|| EngineError::InvalidCurve(format!("machine {} has no nominal power", machine)))?;
        let hashrate = curve
            .hashrate_at_power(power_watts)
            .ok_or(EngineError::RatioNotSupported { ratio })?;

        Ok(PowerPoint {
            machine_id: machine,
            ratio,
            power_watts,
            effective_hashrate_th: hashrate,
            efficiency_th_per_watt: if power_watts.is_zero() {
                Decimal::ZERO
            } else {
                hashrate / power_watts
            },
        })
    }

    /// Allocate the site's tier-1 budget across all of its units
    pub fn get_site_allocation(&self, site: SiteId, objective: Objective) -> Result<SiteAllocationResult> {
        let record = self.sites.site(site).ok_or(EngineError::SiteNotFound(site))?;
        let tariff = self.site_tariff(site);
        let quote = self.quotes.latest_quote();

        let mut machines = Vec::with_capacity(record.instances.len());
        let mut uncovered = Vec::new();
        for instance in &record.instances {
            let spec = self.machine(instance.machine_id)?;
            match self.curves.curve(instance.machine_id) {
                Some(curve) => {
                    let mut machine = SiteMachine::new(spec, curve, instance.quantity).with_instance(instance.id);
                    machine.custom_name = instance.custom_name.clone();
                    machines.push(machine);
                }
                None => uncovered.push((instance, spec)),
            }
        }

        let mut result = SiteAllocator::with_grid(self.grid).allocate(&machines, &tariff, &quote, objective)?;

        // templates without a curve cannot be scored at any ratio
        for (instance, spec) in uncovered {
            let label = instance.custom_name.as_deref().unwrap_or(&spec.model);
            for i in 1..=instance.quantity {
                result.skipped.push(SkippedUnit {
                    name: format!("{} #{}", label, i),
                    machine_id: spec.id,
                    instance_id: Some(instance.id),
                    reason: "no efficiency curve".to_string(),
                });
            }
        }
        result.refresh_totals();

        info!(
            "Site {} '{}' allocated: {} units, {} skipped",
            site,
            record.name,
            result.totals.unit_count,
            result.totals.skipped_count
        );
        Ok(result)
    }

    pub fn get_site_statistics(&self, site: SiteId) -> Result<SiteStatistics> {
        let record = self.sites.site(site).ok_or(EngineError::SiteNotFound(site))?;

        let mut unit_count = 0u64;
        let mut hashrate = Decimal::ZERO;
        let mut power = 0u64;
        for instance in &record.instances {
            let spec = self.machine(instance.machine_id)?;
            let quantity = u64::from(instance.quantity);
            unit_count += quantity;
            hashrate += spec.nominal_hashrate_th * Decimal::from(quantity);
            power += u64::from(spec.nominal_power_watts) * quantity;
        }

        Ok(SiteStatistics {
            site_id: site,
            instance_count: record.instances.len(),
            unit_count,
            nominal_hashrate_th: hashrate,
            nominal_power_watts: power,
            nominal_efficiency_th_per_watt: if power == 0 {
                Decimal::ZERO
            } else {
                hashrate / Decimal::from(power)
            },
            instances_with_ratio: record.instances.iter().filter(|i| i.applied.is_some()).count(),
            tariff: self.site_tariff(site),
            name: record.name,
        })
    }

    /// Record `ratio` as the operating point of every instance in `target`.
    ///
    /// Nothing is recorded unless every affected machine can run at the ratio.
    pub fn apply_ratio(&self, target: RatioTarget, ratio: Decimal, kind: RatioKind) -> Result<Vec<RatioApplication>> {
        if !self.grid.contains(ratio) {
            return Err(EngineError::RatioOutOfDomain {
                ratio,
                min: self.grid.min,
                max: self.grid.max,
            });
        }

        let instances = self.resolve_target(target)?;
        let machines: BTreeSet<MachineId> = instances.iter().map(|i| i.machine_id).collect();
        for machine in machines {
            let (_, lookup) = self.machine_curve(machine)?;
            lookup.curve().try_interpolate(lookup.nominal_power_watts(), ratio)?;
        }

        let applications: Vec<RatioApplication> = instances
            .iter()
            .map(|i| RatioApplication {
                instance_id: i.id,
                machine_id: i.machine_id,
                ratio,
                kind,
            })
            .collect();
        self.record(&applications)?;

        info!("Applied ratio {} ({:?}) to {} instance(s)", ratio, kind, applications.len());
        Ok(applications)
    }

    /// Optimize each affected machine and record its optimum
    pub fn apply_optimal(&self, target: RatioTarget, objective: Objective) -> Result<Vec<RatioApplication>> {
        let instances = self.resolve_target(target)?;
        let tariff = match (target, instances.first()) {
            (RatioTarget::Site(site), _) => self.site_tariff(site),
            (RatioTarget::Instance(_), Some(instance)) => self.site_tariff(instance.site_id),
            (RatioTarget::Instance(_), None) => self.tariffs.default_tariff(),
        };
        let rates = tariff.rates()?;
        let quote = self.quotes.latest_quote();

        let mut optimum: BTreeMap<MachineId, Decimal> = BTreeMap::new();
        for instance in &instances {
            if optimum.contains_key(&instance.machine_id) {
                continue;
            }
            let (spec, lookup) = self.machine_curve(instance.machine_id)?;
            let context = EconomicContext::new(quote.clone(), RewardSource::for_machine(&spec), rates);
            let result = RatioOptimizer::new(&lookup, &context)
                .for_machine(spec.id)
                .with_grid(self.grid)
                .optimize(objective)?;
            optimum.insert(spec.id, result.evaluation.ratio);
        }

        let applications: Vec<RatioApplication> = instances
            .iter()
            .filter_map(|i| {
                optimum.get(&i.machine_id).map(|ratio| RatioApplication {
                    instance_id: i.id,
                    machine_id: i.machine_id,
                    ratio: *ratio,
                    kind: RatioKind::Optimal,
                })
            })
            .collect();
        self.record(&applications)?;

        info!("Applied optimal {} ratios to {} instance(s)", objective, applications.len());
        Ok(applications)
    }

    fn record(&self, applications: &[RatioApplication]) -> Result<()> {
        let batch: Vec<(InstanceId, AppliedRatio)> = applications
            .iter()
            .map(|a| {
                (
                    a.instance_id,
                    AppliedRatio {
                        ratio: a.ratio,
                        kind: a.kind,
                    },
                )
            })
            .collect();
        self.ratios.record_ratios(&batch)
    }

    fn resolve_target(&self, target: RatioTarget) -> Result<Vec<MachineInstance>> {
        match target {
            RatioTarget::Site(site) => self
                .sites
                .site(site)
                .map(|s| s.instances)
                .ok_or(EngineError::SiteNotFound(site)),
            RatioTarget::Instance(id) => self
                .sites
                .instance(id)
                .map(|i| vec![i])
                .ok_or(EngineError::InstanceNotFound(id)),
        }
    }

    fn machine(&self, id: MachineId) -> Result<MachineSpec> {
        self.catalog.machine(id).ok_or(EngineError::MachineNotFound(id))
    }

    /// A machine without a curve has no interpolatable ratio at all
    fn curve(&self, id: MachineId) -> Result<EfficiencyCurve> {
        self.curves.curve(id).ok_or(EngineError::NoValidRatio { machine: id })
    }

    fn machine_curve(&self, id: MachineId) -> Result<(MachineSpec, MachineCurve)> {
        let spec = self.machine(id)?;
        let curve = self.curve(id)?;
        let lookup = MachineCurve::new(curve, spec.nominal_power_watts);
        Ok((spec, lookup))
    }

    fn default_context(&self, spec: &MachineSpec) -> Result<EconomicContext> {
        let rates = self.tariffs.default_tariff().rates()?;
        Ok(EconomicContext::new(self.quotes.latest_quote(), RewardSource::for_machine(spec), rates))
    }

    fn site_tariff(&self, site: SiteId) -> ElectricityTariff {
        self.tariffs
            .site_tariff(site)
            .unwrap_or_else(|| self.tariffs.default_tariff())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveSample;
    use crate::model::Site;
    use crate::optimizer::Coverage;
    use fixture_store::Fixture;
    use rust_decimal_macros::dec;

    mod fixture_store {
        use super::*;
        use std::collections::HashMap;
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct Fixture {
            pub machines: HashMap<MachineId, (MachineSpec, Option<EfficiencyCurve>)>,
            pub sites: Vec<Site>,
            pub quote: MarketQuote,
            pub tariff: ElectricityTariff,
            pub recorded: Mutex<Vec<(InstanceId, AppliedRatio)>>,
            pub rejected: Option<InstanceId>,
        }

        impl MachineCatalog for Fixture {
            fn machine(&self, id: MachineId) -> Option<MachineSpec> {
                self.machines.get(&id).map(|(spec, _)| spec.clone())
            }
        }

        impl CurveStore for Fixture {
            fn curve(&self, machine: MachineId) -> Option<EfficiencyCurve> {
                self.machines.get(&machine).and_then(|(_, curve)| curve.clone())
            }
        }

        impl MarketQuoteProvider for Fixture {
            fn latest_quote(&self) -> MarketQuote {
                self.quote.clone()
            }
        }

        impl TariffProvider for Fixture {
            fn default_tariff(&self) -> ElectricityTariff {
                self.tariff.clone()
            }

            fn site_tariff(&self, _site: SiteId) -> Option<ElectricityTariff> {
                None
            }
        }

        impl SiteDirectory for Fixture {
            fn site(&self, id: SiteId) -> Option<Site> {
                self.sites.iter().find(|s| s.id == id).cloned()
            }

            fn instance(&self, id: InstanceId) -> Option<MachineInstance> {
                self.sites
                    .iter()
                    .flat_map(|s| s.instances.iter())
                    .find(|i| i.id == id)
                    .cloned()
            }
        }

        impl RatioStore for Fixture {
            fn record_ratios(&self, batch: &[(InstanceId, AppliedRatio)]) -> Result<()> {
                if let Some((id, _)) = batch.iter().find(|(id, _)| Some(*id) == self.rejected) {
                    return Err(EngineError::Store(format!("instance {} is read-only", id)));
                }
                self.recorded.lock().unwrap().extend(batch.iter().cloned());
                Ok(())
            }
        }
    }

    fn instance(id: InstanceId, machine_id: MachineId, quantity: u32) -> MachineInstance {
        MachineInstance {
            id,
            site_id: 1,
            machine_id,
            quantity,
            custom_name: None,
            applied: None,
        }
    }

    fn fixture() -> Arc<Fixture> {
        Arc::new(base_fixture())
    }

    fn base_fixture() -> Fixture {
        let mut fx = Fixture::default();
        let curve = EfficiencyCurve::new(vec![
            CurveSample::new(1000, dec!(50)),
            CurveSample::new(1400, dec!(80)),
        ])
        .unwrap();
        fx.machines.insert(1, (MachineSpec::new(1, "Test A", dec!(65), 1200), Some(curve)));
        fx.machines.insert(2, (MachineSpec::new(2, "Uncharted", dec!(90), 3000), None));
        fx.sites.push(Site {
            id: 1,
            name: "Barn".to_string(),
            instances: vec![instance(10, 1, 2), instance(11, 2, 1)],
        });
        fx.quote = MarketQuote::new(dec!(60000), dec!(0.0000005));
        fx.tariff = ElectricityTariff::new(dec!(0.073), dec!(0.089), dec!(40));
        fx
    }

    fn service(fx: &Arc<Fixture>) -> ProfitabilityService {
        ProfitabilityService::new(fx.clone(), fx.clone(), fx.clone(), fx.clone(), fx.clone(), fx.clone())
    }

    #[test]
    fn test_optimal_ratio_within_curve() {
        let fx = fixture();
        let result = service(&fx).get_optimal_ratio(1, Objective::Profit).unwrap();

        // curve covers 1000..=1400 W on a 1200 W machine
        assert!(result.evaluation.ratio >= dec!(0.84));
        assert!(result.evaluation.ratio <= dec!(1.16));
        assert!(result.is_fully_costed());
    }

    #[test]
    fn test_unknown_machine() {
        let fx = fixture();
        let err = service(&fx).get_optimal_ratio(99, Objective::Profit).unwrap_err();
        assert_eq!(err, EngineError::MachineNotFound(99));
    }

    #[test]
    fn test_efficiency_at_power() {
        let fx = fixture();
        let point = service(&fx).get_efficiency_at_power(1, dec!(1080)).unwrap();
        assert_eq!(point.ratio, dec!(0.9));
        assert_eq!(point.effective_hashrate_th, dec!(56));

        let err = service(&fx).get_efficiency_at_power(1, dec!(1500)).unwrap_err();
        assert!(matches!(err, EngineError::RatioNotSupported { .. }));
    }

    #[test]
    fn test_efficiency_at_ratio() {
        let fx = fixture();
        let service = service(&fx);

        // 0.9 × 1200 W = 1080 W -> 56 TH/s
        let evaluation = service.get_efficiency_at_ratio(1, dec!(0.9)).unwrap();
        assert_eq!(evaluation.power_watts, dec!(1080));
        assert_eq!(evaluation.effective_hashrate_th, dec!(56));
        assert!(evaluation.daily_profit.is_some());

        assert_eq!(
            service.get_efficiency_at_ratio(1, dec!(1.2)),
            Err(EngineError::RatioNotSupported { ratio: dec!(1.2) })
        );
        assert!(matches!(
            service.get_efficiency_at_ratio(1, dec!(0.4)),
            Err(EngineError::RatioOutOfDomain { .. })
        ));
        assert_eq!(
            service.get_efficiency_at_ratio(2, dec!(1.0)),
            Err(EngineError::NoValidRatio { machine: 2 })
        );
    }

    #[test]
    fn test_site_allocation_all_skipped_is_technical_only() {
        let mut fx = base_fixture();
        fx.sites.push(Site {
            id: 2,
            name: "Shed".to_string(),
            instances: vec![MachineInstance {
                site_id: 2,
                ..instance(20, 2, 3)
            }],
        });
        let fx = Arc::new(fx);

        let result = service(&fx).get_site_allocation(2, Objective::Profit).unwrap();
        assert_eq!(result.skipped.len(), 3);
        assert_eq!(result.totals.skipped_count, 3);
        assert_eq!(result.totals.daily_profit, None);
        assert_eq!(result.coverage, Coverage::TechnicalOnly);
    }

    #[test]
    fn test_site_allocation_skips_machines_without_curve() {
        let fx = fixture();
        let result = service(&fx).get_site_allocation(1, Objective::Profit).unwrap();

        assert_eq!(result.allocations.len(), 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].name, "Uncharted #1");
        assert_eq!(result.totals.skipped_count, 1);
    }

    #[test]
    fn test_site_statistics() {
        let fx = fixture();
        let stats = service(&fx).get_site_statistics(1).unwrap();

        assert_eq!(stats.unit_count, 3);
        assert_eq!(stats.nominal_hashrate_th, dec!(220));
        assert_eq!(stats.nominal_power_watts, 5400);
        assert_eq!(stats.instances_with_ratio, 0);
    }

    #[test]
    fn test_apply_ratio_validates_before_recording() {
        let fx = fixture();
        let service = service(&fx);

        let err = service
            .apply_ratio(RatioTarget::Instance(10), dec!(1.6), RatioKind::Manual)
            .unwrap_err();
        assert!(matches!(err, EngineError::RatioOutOfDomain { .. }));

        // 1.2 × 1200 W = 1440 W is past the curve
        let err = service
            .apply_ratio(RatioTarget::Instance(10), dec!(1.2), RatioKind::Manual)
            .unwrap_err();
        assert_eq!(err, EngineError::RatioNotSupported { ratio: dec!(1.2) });

        // instance 11 has no curve, so the whole site is refused
        assert!(service
            .apply_ratio(RatioTarget::Site(1), dec!(1.0), RatioKind::Manual)
            .is_err());
        assert!(fx.recorded.lock().unwrap().is_empty());

        let applied = service
            .apply_ratio(RatioTarget::Instance(10), dec!(0.9), RatioKind::Manual)
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(fx.recorded.lock().unwrap()[0].1.ratio, dec!(0.9));
    }

    #[test]
    fn test_rejected_batch_records_nothing() {
        let mut fx = base_fixture();
        let curve = fx.machines[&1].1.clone();
        fx.machines.insert(2, (MachineSpec::new(2, "Twin", dec!(65), 1200), curve));
        fx.rejected = Some(11);
        let fx = Arc::new(fx);

        let err = service(&fx)
            .apply_ratio(RatioTarget::Site(1), dec!(1.0), RatioKind::Manual)
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(fx.recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_apply_optimal_records_kind() {
        let fx = fixture();
        let applied = service(&fx)
            .apply_optimal(RatioTarget::Instance(10), Objective::TechnicalEfficiency)
            .unwrap();

        assert_eq!(applied[0].kind, RatioKind::Optimal);
        assert_eq!(fx.recorded.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_targets() {
        let fx = fixture();
        let service = service(&fx);
        assert_eq!(
            service.apply_ratio(RatioTarget::Site(5), dec!(1.0), RatioKind::Manual),
            Err(EngineError::SiteNotFound(5))
        );
        assert_eq!(
            service.apply_optimal(RatioTarget::Instance(42), Objective::Profit),
            Err(EngineError::InstanceNotFound(42))
        );
    }
}
