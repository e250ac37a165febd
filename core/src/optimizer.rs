//! Two-stage grid search over the scaling ratio
//!
//! Stage 1 walks the whole operating domain at a coarse step. Stage 2
//! re-centres a narrower window on the stage-1 pick and walks it at a fine
//! step. Ratios the curve cannot interpolate are skipped silently. Scores
//! are compared strictly, so on ties the lower ratio (seen first) wins.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{COARSE_STEP, FINE_STEP, FINE_WINDOW, HOURS_PER_DAY, RATIO_MAX, RATIO_MIN};
use crate::curve::{EfficiencyLookup, OperatingPoint};
use crate::error::{DataGap, EngineError, Result};
use crate::model::{MachineId, MarketQuote};
use crate::revenue::RewardSource;
use crate::tariff::TariffRates;

/// What the search maximises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Daily revenue minus daily electricity cost
    Profit,
    /// TH/s per watt, ignores economics
    TechnicalEfficiency,
    /// Sats earned per hour, only scored where revenue is known
    SatsPerHour,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Profit => "profit",
            Objective::TechnicalEfficiency => "technical_efficiency",
            Objective::SatsPerHour => "sats_per_hour",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "profit" => Ok(Objective::Profit),
            "technical_efficiency" | "efficiency" => Ok(Objective::TechnicalEfficiency),
            "sats_per_hour" | "sats" => Ok(Objective::SatsPerHour),
            other => Err(format!("unknown objective: {}", other)),
        }
    }
}

/// Ratio grid definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub min: Decimal,
    pub max: Decimal,
    pub coarse_step: Decimal,
    pub fine_step: Decimal,
    /// Half-width of the fine window
    pub fine_window: Decimal,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            min: RATIO_MIN,
            max: RATIO_MAX,
            coarse_step: COARSE_STEP,
            fine_step: FINE_STEP,
            fine_window: FINE_WINDOW,
        }
    }
}

impl GridSpec {
    pub fn contains(&self, ratio: Decimal) -> bool {
        ratio >= self.min && ratio <= self.max
    }

    /// Stage 1 points, `min..=max`
    pub fn coarse_points(&self) -> Vec<Decimal> {
        steps(self.min, self.max, self.coarse_step)
    }

    /// Stage 2 points around `center`, clipped to the domain on each side
    /// independently
    pub fn fine_points(&self, center: Decimal) -> Vec<Decimal> {
        let lo = (center - self.fine_window).max(self.min);
        let hi = (center + self.fine_window).min(self.max);
        steps(lo, hi, self.fine_step)
    }
}

fn steps(lo: Decimal, hi: Decimal, step: Decimal) -> Vec<Decimal> {
    let mut points = Vec::new();
    if step <= Decimal::ZERO {
        return points;
    }
    let mut ratio = lo;
    while ratio <= hi {
        points.push(ratio);
        ratio += step;
    }
    points
}

/// Market and tariff snapshot used to score one machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicContext {
    pub quote: MarketQuote,
    pub reward: RewardSource,
    pub rates: Option<TariffRates>,
    /// Tier-1 kWh still available to this machine
    pub tier1_budget_kwh: Decimal,
}

impl EconomicContext {
    /// Context with a fresh tier-1 budget equal to the tariff limit
    pub fn new(quote: MarketQuote, reward: RewardSource, rates: Option<TariffRates>) -> Self {
        let tier1_budget_kwh = rates.map(|r| r.tier1_daily_kwh_limit).unwrap_or(Decimal::ZERO);
        Self {
            quote,
            reward,
            rates,
            tier1_budget_kwh,
        }
    }

    pub fn with_budget(mut self, tier1_budget_kwh: Decimal) -> Self {
        self.tier1_budget_kwh = tier1_budget_kwh;
        self
    }

    /// Inputs missing from this snapshot, sorted
    pub fn gaps(&self) -> Vec<DataGap> {
        let mut gaps = self.reward.gaps(&self.quote);
        if self.rates.is_none() {
            gaps.push(DataGap::Tariff);
        }
        gaps.sort();
        gaps.dedup();
        gaps
    }

    /// Score every figure for one operating point
    pub fn evaluate_point(&self, point: &OperatingPoint) -> RatioEvaluation {
        let hashrate = point.effective_hashrate_th;
        let power = point.power_watts;

        let efficiency_th_per_watt = if power.is_zero() {
            Decimal::ZERO
        } else {
            hashrate / power
        };
        let efficiency_j_per_th = if hashrate.is_zero() {
            None
        } else {
            Some(power / hashrate)
        };

        let estimate = self.reward.estimate(hashrate, &self.quote);
        let cost = self
            .rates
            .map(|r| r.daily_cost(power, HOURS_PER_DAY, self.tier1_budget_kwh).cost);
        let profit = estimate.revenue.zip(cost).map(|(revenue, cost)| revenue - cost);

        RatioEvaluation {
            ratio: point.ratio,
            effective_hashrate_th: hashrate,
            power_watts: power,
            efficiency_th_per_watt,
            efficiency_j_per_th,
            daily_coins: estimate.coins_per_day,
            sats_per_hour: estimate.sats_per_hour,
            daily_revenue: estimate.revenue,
            daily_electricity_cost: cost,
            daily_profit: profit,
        }
    }
}

/// All figures at one ratio. Economic fields are `None` when unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioEvaluation {
    pub ratio: Decimal,
    pub effective_hashrate_th: Decimal,
    pub power_watts: Decimal,
    pub efficiency_th_per_watt: Decimal,
    pub efficiency_j_per_th: Option<Decimal>,
    pub daily_coins: Option<Decimal>,
    pub sats_per_hour: Option<Decimal>,
    pub daily_revenue: Option<Decimal>,
    pub daily_electricity_cost: Option<Decimal>,
    pub daily_profit: Option<Decimal>,
}

impl RatioEvaluation {
    pub fn score(&self, objective: Objective) -> Option<Decimal> {
        match objective {
            Objective::Profit => self.daily_profit,
            Objective::TechnicalEfficiency => Some(self.efficiency_th_per_watt),
            Objective::SatsPerHour => self.daily_revenue.and(self.sats_per_hour),
        }
    }
}

/// Whether the chosen point carries real economics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    FullyCosted,
    /// Revenue or cost unknown; only the technical figures are meaningful
    TechnicalOnly,
}

/// How the chosen point was picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Scored,
    HighestHashrateFallback,
    FirstValidFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub objective: Objective,
    #[serde(flatten)]
    pub evaluation: RatioEvaluation,
    pub score: Option<Decimal>,
    pub coverage: Coverage,
    pub selection: Selection,
    pub gaps: Vec<DataGap>,
    /// Every point visited by both stages, ascending by ratio
    pub evaluations: Vec<RatioEvaluation>,
}

impl OptimizationResult {
    pub fn is_fully_costed(&self) -> bool {
        self.coverage == Coverage::FullyCosted
    }
}

/// Interpolatable coarse ratios for a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableRatios {
    pub min_ratio: Option<Decimal>,
    pub max_ratio: Option<Decimal>,
    pub ratios: Vec<Decimal>,
}

pub struct RatioOptimizer<'a> {
    lookup: &'a dyn EfficiencyLookup,
    context: &'a EconomicContext,
    grid: GridSpec,
    machine: MachineId,
}

impl<'a> RatioOptimizer<'a> {
    pub fn new(lookup: &'a dyn EfficiencyLookup, context: &'a EconomicContext) -> Self {
        Self {
            lookup,
            context,
            grid: GridSpec::default(),
            machine: 0,
        }
    }

    /// Machine id reported in `NoValidRatio`
    pub fn for_machine(mut self, machine: MachineId) -> Self {
        self.machine = machine;
        self
    }

    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = grid;
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Figures at one ratio, `None` if the curve does not cover it
    pub fn evaluate(&self, ratio: Decimal) -> Option<RatioEvaluation> {
        let point = self.lookup.lookup(ratio)?;
        Some(self.context.evaluate_point(&point))
    }

    /// Every interpolatable coarse ratio, ascending
    pub fn analyze(&self) -> Vec<RatioEvaluation> {
        self.scan(&self.grid.coarse_points())
    }

    pub fn available_ratios(&self) -> AvailableRatios {
        let ratios: Vec<Decimal> = self.analyze().into_iter().map(|e| e.ratio).collect();
        AvailableRatios {
            min_ratio: ratios.first().copied(),
            max_ratio: ratios.last().copied(),
            ratios,
        }
    }

    pub fn optimize(&self, objective: Objective) -> Result<OptimizationResult> {
        // Stage 1
        let coarse = self.analyze();
        if coarse.is_empty() {
            warn!("Machine {}: no interpolatable ratio in [{}, {}]", self.machine, self.grid.min, self.grid.max);
            return Err(EngineError::NoValidRatio { machine: self.machine });
        }

        let (mut best, mut selection) = match best_scored(&coarse, objective) {
            Some(e) => (e.clone(), Selection::Scored),
            None => fallback(&coarse, objective),
        };
        if selection != Selection::Scored {
            warn!(
                "Machine {}: no {} score defined, falling back to ratio {} ({:?})",
                self.machine, objective, best.ratio, selection
            );
        }
        debug!(
            "Machine {}: stage 1 picked {} over {} points",
            self.machine,
            best.ratio,
            coarse.len()
        );

        // Stage 2
        let fine = self.scan(&self.grid.fine_points(best.ratio));
        let mut best_score = best.score(objective);
        for candidate in &fine {
            let score = candidate.score(objective);
            if beats(score, best_score) {
                best = candidate.clone();
                best_score = score;
                selection = Selection::Scored;
            }
        }
        debug!(
            "Machine {}: stage 2 settled on {} over {} points",
            self.machine,
            best.ratio,
            fine.len()
        );

        let coverage = if best.daily_profit.is_some() {
            Coverage::FullyCosted
        } else {
            Coverage::TechnicalOnly
        };

        let mut visited: BTreeMap<Decimal, RatioEvaluation> = BTreeMap::new();
        for e in coarse.into_iter().chain(fine) {
            visited.entry(e.ratio).or_insert(e);
        }

        Ok(OptimizationResult {
            objective,
            score: best_score,
            evaluation: best,
            coverage,
            selection,
            gaps: self.context.gaps(),
            evaluations: visited.into_values().collect(),
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn scan(&self, ratios: &[Decimal]) -> Vec<RatioEvaluation> {
        ratios.iter().filter_map(|r| self.evaluate(*r)).collect()
    }

    // collect() keeps input order, so selection stays deterministic
    #[cfg(feature = "parallel")]
    fn scan(&self, ratios: &[Decimal]) -> Vec<RatioEvaluation> {
        use rayon::prelude::*;
        ratios.par_iter().filter_map(|r| self.evaluate(*r)).collect()
    }
}

/// Defined beats undefined; otherwise strictly greater
fn beats(candidate: Option<Decimal>, incumbent: Option<Decimal>) -> bool {
    match (candidate, incumbent) {
        (Some(c), Some(i)) => c > i,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn best_scored(evaluations: &[RatioEvaluation], objective: Objective) -> Option<&RatioEvaluation> {
    let mut best: Option<(Decimal, &RatioEvaluation)> = None;
    for e in evaluations {
        if let Some(score) = e.score(objective) {
            match best {
                Some((top, _)) if score <= top => {}
                _ => best = Some((score, e)),
            }
        }
    }
    best.map(|(_, e)| e)
}

/// `evaluations` is non-empty
fn fallback(evaluations: &[RatioEvaluation], objective: Objective) -> (RatioEvaluation, Selection) {
    match objective {
        Objective::SatsPerHour => (evaluations[0].clone(), Selection::FirstValidFallback),
        Objective::Profit | Objective::TechnicalEfficiency => {
            let mut best = &evaluations[0];
            for e in &evaluations[1..] {
                if e.effective_hashrate_th > best.effective_hashrate_th {
                    best = e;
                }
            }
            (best.clone(), Selection::HighestHashrateFallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{CurveSample, EfficiencyCurve, MachineCurve};
    use crate::tariff::TariffRates;
    use rust_decimal_macros::dec;

    // Concave curve over 1000..=4000 W for a 3000 W machine
    fn lookup() -> MachineCurve {
        let curve = EfficiencyCurve::new(vec![
            CurveSample::new(1000, dec!(60)),
            CurveSample::new(2000, dec!(100)),
            CurveSample::new(3000, dec!(130)),
            CurveSample::new(4000, dec!(145)),
            CurveSample::new(4500, dec!(150)),
        ])
        .unwrap();
        MachineCurve::new(curve, 3000)
    }

    fn context() -> EconomicContext {
        EconomicContext::new(
            MarketQuote::new(dec!(60000), dec!(0.0000005)),
            RewardSource::Fpps,
            Some(TariffRates::new(dec!(0.05), dec!(0.08), dec!(50)).unwrap()),
        )
    }

    #[test]
    fn test_coarse_grid_has_21_points() {
        let grid = GridSpec::default();
        let points = grid.coarse_points();
        assert_eq!(points.len(), 21);
        assert_eq!(points[0], dec!(0.50));
        assert_eq!(points[20], dec!(1.50));
    }

    #[test]
    fn test_fine_window_clips_asymmetrically() {
        let grid = GridSpec::default();
        let low = grid.fine_points(dec!(0.55));
        assert_eq!(low.first(), Some(&dec!(0.50)));
        assert_eq!(low.last(), Some(&dec!(0.65)));
        assert_eq!(low.len(), 16);

        let mid = grid.fine_points(dec!(1.00));
        assert_eq!(mid.len(), 21);
    }

    #[test]
    fn test_objective_parsing() {
        assert_eq!("profit".parse::<Objective>().unwrap(), Objective::Profit);
        assert_eq!("Technical-Efficiency".parse::<Objective>().unwrap(), Objective::TechnicalEfficiency);
        assert_eq!("sats".parse::<Objective>().unwrap(), Objective::SatsPerHour);
        assert!("revenue".parse::<Objective>().is_err());
        assert_eq!(Objective::SatsPerHour.to_string(), "sats_per_hour");
    }

    #[test]
    fn test_profit_optimum_is_fully_costed() {
        let lookup = lookup();
        let context = context();
        let result = RatioOptimizer::new(&lookup, &context).optimize(Objective::Profit).unwrap();

        assert_eq!(result.coverage, Coverage::FullyCosted);
        assert_eq!(result.selection, Selection::Scored);
        assert!(result.gaps.is_empty());
        for e in &result.evaluations {
            assert!(e.daily_profit.unwrap() <= result.evaluation.daily_profit.unwrap());
        }
    }

    #[test]
    fn test_efficiency_prefers_low_ratio_on_concave_curve() {
        let lookup = lookup();
        let context = context();
        let result = RatioOptimizer::new(&lookup, &context)
            .optimize(Objective::TechnicalEfficiency)
            .unwrap();

        // 1000 W (ratio 1/3) is out of the domain; 1500 W at 0.50 is the most efficient point
        assert_eq!(result.evaluation.ratio, dec!(0.50));
    }

    #[test]
    fn test_unsupported_ratios_skipped() {
        let lookup = lookup();
        let context = context();
        let optimizer = RatioOptimizer::new(&lookup, &context);

        // 1.55 × 3000 W = 4650 W is past the last sample
        assert!(optimizer.evaluate(dec!(1.55)).is_none());
        let available = optimizer.available_ratios();
        assert_eq!(available.min_ratio, Some(dec!(0.50)));
        assert_eq!(available.max_ratio, Some(dec!(1.50)));
        assert_eq!(available.ratios.len(), 21);
    }

    #[test]
    fn test_missing_tariff_is_technical_only() {
        let lookup = lookup();
        let mut context = context();
        context.rates = None;

        let result = RatioOptimizer::new(&lookup, &context).optimize(Objective::Profit).unwrap();
        assert_eq!(result.coverage, Coverage::TechnicalOnly);
        assert_eq!(result.selection, Selection::HighestHashrateFallback);
        assert_eq!(result.evaluation.ratio, dec!(1.50));
        assert_eq!(result.evaluation.daily_electricity_cost, None);
        assert!(result.evaluation.daily_revenue.is_some());
        assert_eq!(result.gaps, vec![DataGap::Tariff]);
    }

    #[test]
    fn test_sats_without_revenue_takes_first_valid() {
        let lookup = lookup();
        let context = EconomicContext::new(MarketQuote::unknown(), RewardSource::Fpps, None);

        let result = RatioOptimizer::new(&lookup, &context)
            .optimize(Objective::SatsPerHour)
            .unwrap();
        assert_eq!(result.selection, Selection::FirstValidFallback);
        assert_eq!(result.evaluation.ratio, dec!(0.50));
        assert_eq!(result.coverage, Coverage::TechnicalOnly);
        assert_eq!(result.gaps, vec![DataGap::Price, DataGap::RewardRate, DataGap::Tariff]);
    }

    #[test]
    fn test_no_valid_ratio() {
        let curve = EfficiencyCurve::new(vec![CurveSample::new(100, dec!(5))]).unwrap();
        let lookup = MachineCurve::new(curve, 3000);
        let context = context();

        let err = RatioOptimizer::new(&lookup, &context)
            .for_machine(9)
            .optimize(Objective::Profit)
            .unwrap_err();
        assert_eq!(err, EngineError::NoValidRatio { machine: 9 });
    }

    #[test]
    fn test_evaluations_are_unique_and_sorted() {
        let lookup = lookup();
        let context = context();
        let result = RatioOptimizer::new(&lookup, &context).optimize(Objective::Profit).unwrap();

        for pair in result.evaluations.windows(2) {
            assert!(pair[0].ratio < pair[1].ratio);
        }
    }

    #[test]
    fn test_result_serializes_flat() {
        let lookup = lookup();
        let context = context();
        let result = RatioOptimizer::new(&lookup, &context).optimize(Objective::Profit).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert!(json.get("ratio").is_some());
        assert_eq!(json["coverage"], "fully_costed");
        assert_eq!(json["objective"], "profit");
    }
}
