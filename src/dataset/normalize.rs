//! Min-max normalization
//!
//! Stats are computed once over the training series and reused unchanged at
//! inference time, so training and forecasting see the same scale.

use serde::{Deserialize, Serialize};

use crate::domain::record::clamp_number;

/// Per-field scale, `range = max - min` (or `1` for a constant series)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

impl FieldStats {
    /// Stats used when there is nothing to scale
    pub fn empty() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            range: 1.0,
        }
    }

    pub fn normalize(&self, value: f64) -> f64 {
        normalize(value, self)
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        denormalize(value, self)
    }
}

impl Default for FieldStats {
    fn default() -> Self {
        Self::empty()
    }
}

/// Compute min/max/range over `values`. Non-finite values count as 0.
pub fn compute_stats(values: &[f64]) -> FieldStats {
    if values.is_empty() {
        return FieldStats::empty();
    }

    let (min, max) = values
        .iter()
        .map(|v| clamp_number(*v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

    let range = max - min;
    FieldStats {
        min,
        max,
        range: if range == 0.0 { 1.0 } else { range },
    }
}

pub fn normalize(value: f64, stats: &FieldStats) -> f64 {
    (value - stats.min) / stats.range
}

pub fn denormalize(value: f64, stats: &FieldStats) -> f64 {
    value * stats.range + stats.min
}
