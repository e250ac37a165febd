//! Engine properties and reference scenarios
//!
//! Determinism, tier-1 conservation and optimality checks run against the
//! public API only, the way a host application would drive the engine.

use hashwatt_core::constants::{HOURS_PER_DAY, RATIO_MAX, RATIO_MIN};
use hashwatt_core::optimizer::GridSpec;
use hashwatt_core::{
    Coverage, CurveSample, Decimal, EconomicContext, EfficiencyCurve, EfficiencyLookup,
    ElectricityTariff, MachineCurve, MachineSpec, MarketQuote, Objective, RatioOptimizer,
    RewardSource, Selection, SiteAllocator, SiteMachine, TariffRates, TierLedger,
};
use rust_decimal_macros::dec;

/// Concave curve covering the whole domain of a 3000 W machine
fn concave_machine() -> MachineCurve {
    let curve = EfficiencyCurve::new(vec![
        CurveSample::new(1500, dec!(90)),
        CurveSample::new(2250, dec!(120)),
        CurveSample::new(3000, dec!(140)),
        CurveSample::new(3750, dec!(152)),
        CurveSample::new(4500, dec!(158)),
    ])
    .unwrap();
    MachineCurve::new(curve, 3000)
}

fn reference_rates() -> TariffRates {
    TariffRates::new(dec!(0.073), dec!(0.089), dec!(40)).unwrap()
}

fn rich_context() -> EconomicContext {
    EconomicContext::new(
        MarketQuote::new(dec!(100000), dec!(0.000001)),
        RewardSource::Fpps,
        Some(reference_rates()),
    )
}

fn permutations(items: &[Decimal]) -> Vec<Vec<Decimal>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// 1. Interpolation
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_interpolation_is_deterministic() {
    let machine = concave_machine();
    for ratio in GridSpec::default().fine_points(dec!(1.0)) {
        let first = machine.lookup(ratio);
        for _ in 0..5 {
            assert_eq!(machine.lookup(ratio), first);
        }
    }
}

#[test]
fn test_sample_hits_are_exact() {
    let machine = concave_machine();
    for sample in machine.curve().samples() {
        let ratio = Decimal::from(sample.power_watts) / dec!(3000);
        let point = machine.lookup(ratio).unwrap();
        assert_eq!(point.effective_hashrate_th, sample.effective_hashrate_th);
    }
}

#[test]
fn test_scenario_ratio_0_9_gives_56_th() {
    let curve = EfficiencyCurve::new(vec![
        CurveSample::new(1000, dec!(50)),
        CurveSample::new(1400, dec!(80)),
    ])
    .unwrap();
    let point = curve.interpolate(1200, dec!(0.9)).unwrap();

    assert_eq!(point.power_watts, dec!(1080));
    assert_eq!(point.effective_hashrate_th, dec!(56));
}

// ═══════════════════════════════════════════════════════════════════════════
// 2. Tiered cost
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_cost_monotonic_in_power() {
    let rates = reference_rates();
    for budget in [Decimal::ZERO, dec!(10), dec!(40)] {
        let mut previous = Decimal::ZERO;
        for watts in (0..=5000u32).step_by(50) {
            let cost = rates.daily_cost(Decimal::from(watts), HOURS_PER_DAY, budget).cost;
            assert!(cost >= previous, "cost fell at {} W with budget {}", watts, budget);
            previous = cost;
        }
    }
}

#[test]
fn test_tier1_conserved_in_any_order() {
    let powers = [dec!(1250), dec!(900), dec!(2000), dec!(600)];
    let total_kwh: Decimal = powers.iter().map(|p| *p * HOURS_PER_DAY / dec!(1000)).sum();

    for order in permutations(&powers) {
        let mut ledger = TierLedger::new(Some(reference_rates()));
        let mut tier1 = Decimal::ZERO;
        for power in &order {
            tier1 += ledger.bill(*power).unwrap().tier1_kwh;
        }
        assert!(tier1 <= dec!(40));
        assert_eq!(tier1, total_kwh.min(dec!(40)));
        assert_eq!(ledger.tier1_kwh() + ledger.tier2_kwh(), total_kwh);
    }
}

#[test]
fn test_scenario_single_unit_cost() {
    let bill = reference_rates().daily_cost(dec!(1250), HOURS_PER_DAY, dec!(40));
    assert_eq!(bill.kwh, dec!(30));
    assert_eq!(bill.cost, dec!(2.19));
    assert_eq!(bill.remaining_tier1_kwh, dec!(10));
}

#[test]
fn test_scenario_two_units_share_budget() {
    let spec = MachineSpec::new(1, "Flat", dec!(100), 1250);
    let curve = EfficiencyCurve::new(vec![CurveSample::new(1250, dec!(100))]).unwrap();
    let machines = vec![SiteMachine::new(spec, curve, 2)];

    let result = SiteAllocator::new()
        .allocate(
            &machines,
            &ElectricityTariff::new(dec!(0.073), dec!(0.089), dec!(40)),
            &MarketQuote::new(dec!(60000), dec!(0.0000005)),
            Objective::Profit,
        )
        .unwrap();

    let costs: Vec<_> = result
        .allocations
        .iter()
        .map(|a| a.evaluation.daily_electricity_cost)
        .collect();
    assert_eq!(costs, vec![Some(dec!(2.19)), Some(dec!(2.51))]);
    assert_eq!(result.tier.tier1_used_kwh, dec!(40));
    assert_eq!(result.tier.tier2_used_kwh, dec!(20));
}

// ═══════════════════════════════════════════════════════════════════════════
// 3. Optimizer
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_ratio_always_in_domain() {
    let narrow = MachineCurve::new(
        EfficiencyCurve::new(vec![
            CurveSample::new(2900, dec!(135)),
            CurveSample::new(3100, dec!(141)),
        ])
        .unwrap(),
        3000,
    );
    let wide = concave_machine();
    let context = rich_context();

    let lookups: [&dyn EfficiencyLookup; 2] = [&narrow, &wide];
    for lookup in lookups {
        for objective in [Objective::Profit, Objective::TechnicalEfficiency, Objective::SatsPerHour] {
            let result = RatioOptimizer::new(lookup, &context).optimize(objective).unwrap();
            assert!(result.evaluation.ratio >= RATIO_MIN);
            assert!(result.evaluation.ratio <= RATIO_MAX);
        }
    }
}

#[test]
fn test_optimum_beats_every_evaluation() {
    let machine = concave_machine();
    let context = rich_context();

    for objective in [Objective::Profit, Objective::TechnicalEfficiency, Objective::SatsPerHour] {
        let result = RatioOptimizer::new(&machine, &context).optimize(objective).unwrap();
        let best = result.score.unwrap();
        for e in &result.evaluations {
            assert!(e.score(objective).unwrap() <= best, "{} beat the optimum", e.ratio);
        }
    }
}

#[test]
fn test_optimum_matches_brute_force_fine_grid() {
    let machine = concave_machine();
    let context = rich_context();
    let optimizer = RatioOptimizer::new(&machine, &context);

    let mut brute = Decimal::MIN;
    let mut ratio = RATIO_MIN;
    while ratio <= RATIO_MAX {
        let score = optimizer.evaluate(ratio).unwrap().score(Objective::Profit).unwrap();
        brute = brute.max(score);
        ratio += dec!(0.01);
    }

    let result = optimizer.optimize(Objective::Profit).unwrap();
    assert!(result.score.unwrap() >= brute);
    assert_eq!(result.coverage, Coverage::FullyCosted);
    // tier-2 marginal cost overtakes marginal revenue past the 3000 W sample
    assert_eq!(result.evaluation.ratio, dec!(1.00));
}

#[test]
fn test_unknown_price_falls_back_to_best_hashrate() {
    let machine = concave_machine();
    let quote = MarketQuote {
        price_per_coin: None,
        ..MarketQuote::new(dec!(100000), dec!(0.000001))
    };
    let context = EconomicContext::new(quote, RewardSource::Fpps, Some(reference_rates()));

    let result = RatioOptimizer::new(&machine, &context).optimize(Objective::Profit).unwrap();

    assert_eq!(result.selection, Selection::HighestHashrateFallback);
    assert_eq!(result.coverage, Coverage::TechnicalOnly);
    assert_eq!(result.evaluation.ratio, dec!(1.50));
    assert_eq!(result.evaluation.daily_profit, None);
    assert_eq!(result.evaluation.daily_revenue, None);
    assert!(result.evaluation.daily_electricity_cost.is_some());
}

#[test]
fn test_analysis_is_idempotent() {
    let machine = concave_machine();
    let context = rich_context();
    let optimizer = RatioOptimizer::new(&machine, &context);

    let first = optimizer.analyze();
    let second = optimizer.analyze();
    assert_eq!(first.len(), 21);
    assert_eq!(first, second);
}
