//! Efficiency curves and ratio interpolation
//!
//! A curve is a set of measured `(power, effective hashrate)` samples for one
//! machine model. A scaling ratio is turned into a target power draw
//! (`ratio × nominal power`) and the hashrate at that draw is interpolated
//! linearly between the two bracketing samples. Draws outside the measured
//! range are not extrapolated: the ratio is simply unsupported.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One measured operating point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveSample {
    pub power_watts: u32,
    pub effective_hashrate_th: Decimal,
}

impl CurveSample {
    pub fn new(power_watts: u32, effective_hashrate_th: Decimal) -> Self {
        Self { power_watts, effective_hashrate_th }
    }
}

/// Interpolated operating point for a ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub ratio: Decimal,
    pub effective_hashrate_th: Decimal,
    pub power_watts: Decimal,
}

/// Samples sorted ascending by power, unique powers, never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CurveSample>", into = "Vec<CurveSample>")]
pub struct EfficiencyCurve {
    samples: Vec<CurveSample>,
}

impl EfficiencyCurve {
    /// Build a curve from samples in any order
    pub fn new(mut samples: Vec<CurveSample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(EngineError::InvalidCurve("curve has no samples".to_string()));
        }
        if let Some(bad) = samples.iter().find(|s| s.effective_hashrate_th < Decimal::ZERO) {
            return Err(EngineError::InvalidCurve(format!(
                "negative hashrate {} at {} W",
                bad.effective_hashrate_th, bad.power_watts
            )));
        }

        samples.sort_by_key(|s| s.power_watts);
        if let Some(pair) = samples.windows(2).find(|w| w[0].power_watts == w[1].power_watts) {
            return Err(EngineError::InvalidCurve(format!(
                "duplicate sample at {} W",
                pair[0].power_watts
            )));
        }

        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[CurveSample] {
        &self.samples
    }

    /// Lowest and highest sampled power
    pub fn power_range(&self) -> (u32, u32) {
        // non-empty by construction
        let first = self.samples[0].power_watts;
        let last = self.samples[self.samples.len() - 1].power_watts;
        (first, last)
    }

    /// Hashrate at an absolute power draw, `None` outside the sampled range
    pub fn hashrate_at_power(&self, target: Decimal) -> Option<Decimal> {
        let (min, max) = self.power_range();
        if target < Decimal::from(min) || target > Decimal::from(max) {
            return None;
        }

        // First sample at or above the target
        let idx = self
            .samples
            .partition_point(|s| Decimal::from(s.power_watts) < target);
        let upper = self.samples[idx];
        if Decimal::from(upper.power_watts) == target {
            return Some(upper.effective_hashrate_th);
        }

        // target > min, so idx >= 1
        let lower = self.samples[idx - 1];
        let p0 = Decimal::from(lower.power_watts);
        let p1 = Decimal::from(upper.power_watts);
        let h0 = lower.effective_hashrate_th;
        let h1 = upper.effective_hashrate_th;

        Some(h0 + (h1 - h0) * (target - p0) / (p1 - p0))
    }

    /// Interpolate the operating point for `ratio × nominal_power`
    pub fn interpolate(&self, nominal_power_watts: u32, ratio: Decimal) -> Option<OperatingPoint> {
        let target = ratio * Decimal::from(nominal_power_watts);
        self.hashrate_at_power(target).map(|hashrate| OperatingPoint {
            ratio,
            effective_hashrate_th: hashrate,
            power_watts: target,
        })
    }

    /// Same as [`interpolate`](Self::interpolate) for callers that treat an
    /// unsupported ratio as an error
    pub fn try_interpolate(&self, nominal_power_watts: u32, ratio: Decimal) -> Result<OperatingPoint> {
        self.interpolate(nominal_power_watts, ratio)
            .ok_or(EngineError::RatioNotSupported { ratio })
    }
}

impl TryFrom<Vec<CurveSample>> for EfficiencyCurve {
    type Error = EngineError;

    fn try_from(samples: Vec<CurveSample>) -> Result<Self> {
        Self::new(samples)
    }
}

impl From<EfficiencyCurve> for Vec<CurveSample> {
    fn from(curve: EfficiencyCurve) -> Self {
        curve.samples
    }
}

/// Ratio that corresponds to an absolute power draw
pub fn ratio_for_power(nominal_power_watts: u32, power_watts: Decimal) -> Option<Decimal> {
    if nominal_power_watts == 0 {
        return None;
    }
    Some(power_watts / Decimal::from(nominal_power_watts))
}

/// Ratio → operating point capability. Implementations must be pure.
pub trait EfficiencyLookup: Sync {
    fn lookup(&self, ratio: Decimal) -> Option<OperatingPoint>;
}

/// A curve bound to the nominal power of its machine
#[derive(Debug, Clone)]
pub struct MachineCurve {
    curve: EfficiencyCurve,
    nominal_power_watts: u32,
}

impl MachineCurve {
    pub fn new(curve: EfficiencyCurve, nominal_power_watts: u32) -> Self {
        Self { curve, nominal_power_watts }
    }

    pub fn curve(&self) -> &EfficiencyCurve {
        &self.curve
    }

    pub fn nominal_power_watts(&self) -> u32 {
        self.nominal_power_watts
    }
}

impl EfficiencyLookup for MachineCurve {
    fn lookup(&self, ratio: Decimal) -> Option<OperatingPoint> {
        self.curve.interpolate(self.nominal_power_watts, ratio)
    }
}
