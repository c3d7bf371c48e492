//! Forecast quality metrics
//!
//! Metrics are computed in natural units over a subset of the chart series, one set
//! per field, then averaged into a single accuracy score for ranking candidates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::ChartPoint;

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("Dimension mismatch: {actual} actual values, {predicted} predicted values")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("No data to evaluate")]
    EmptyData,
}

/// Error metrics for one field, rounded to 2 decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Root Mean Square Error
    pub rmse: f64,
    /// `1 - mae / mean(actual)` as a percentage in `[0, 100]`
    pub accuracy: f64,
}

impl FieldMetrics {
    /// Placeholder recorded for a candidate that failed to train
    pub fn failed() -> Self {
        Self {
            mae: f64::NAN,
            rmse: f64::NAN,
            accuracy: f64::NAN,
        }
    }

    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, MetricsError> {
        if actual.len() != predicted.len() {
            return Err(MetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(MetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).abs())
            .sum::<f64>()
            / n;
        let rmse = (actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        let mean_actual = actual.iter().sum::<f64>() / n;
        let denominator = if mean_actual == 0.0 { 1.0 } else { mean_actual };

        Ok(Self {
            mae: round2(mae),
            rmse: round2(rmse),
            accuracy: round2(accuracy_percent(mae, denominator)),
        })
    }
}

impl fmt::Display for FieldMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.2}, RMSE={:.2}, accuracy={:.2}%",
            self.mae, self.rmse, self.accuracy
        )
    }
}

/// Metrics for one partition (train, validation or test)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMetrics {
    pub per_field: BTreeMap<String, FieldMetrics>,
    pub avg_accuracy: f64,
}

impl PartitionMetrics {
    /// Mean of several runs, field by field. `None` when `runs` is empty.
    pub fn average<'a, I>(runs: I, fields: &[String]) -> Option<Self>
    where
        I: IntoIterator<Item = &'a PartitionMetrics>,
    {
        let runs: Vec<&PartitionMetrics> = runs.into_iter().collect();
        if runs.is_empty() {
            return None;
        }
        let n = runs.len() as f64;

        let per_field = fields
            .iter()
            .map(|field| {
                let (mae, rmse, accuracy) = runs
                    .iter()
                    .filter_map(|run| run.per_field.get(field))
                    .fold((0.0, 0.0, 0.0), |(mae, rmse, acc), m| {
                        (mae + zero_if_nan(m.mae), rmse + zero_if_nan(m.rmse), acc + zero_if_nan(m.accuracy))
                    });
                (
                    field.clone(),
                    FieldMetrics {
                        mae: round2(mae / n),
                        rmse: round2(rmse / n),
                        accuracy: round2(accuracy / n),
                    },
                )
            })
            .collect();

        let avg_accuracy = runs.iter().map(|r| zero_if_nan(r.avg_accuracy)).sum::<f64>() / n;

        Some(Self {
            per_field,
            avg_accuracy,
        })
    }
}

/// Accuracy percentage, clamped to `[0, 100]`; non-finite inputs give 0
pub fn accuracy_percent(mae: f64, mean_actual: f64) -> f64 {
    let accuracy = (1.0 - mae / mean_actual) * 100.0;
    if accuracy.is_finite() {
        accuracy.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn zero_if_nan(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

/// Metrics over the chart points at `indices`. Out-of-range indices are skipped;
/// returns `None` when nothing is left to evaluate.
pub fn compute_partition_metrics(
    chart: &[ChartPoint],
    fields: &[String],
    indices: &[usize],
) -> Option<PartitionMetrics> {
    let subset: Vec<&ChartPoint> = indices.iter().filter_map(|&i| chart.get(i)).collect();
    if subset.is_empty() || fields.is_empty() {
        return None;
    }

    let mut per_field = BTreeMap::new();
    for field in fields {
        let actual: Vec<f64> = subset
            .iter()
            .map(|p| p.actual.get(field).copied().unwrap_or(0.0))
            .collect();
        let predicted: Vec<f64> = subset
            .iter()
            .map(|p| p.predicted.get(field).copied().unwrap_or(0.0))
            .collect();
        let metrics = FieldMetrics::calculate(&actual, &predicted).ok()?;
        per_field.insert(field.clone(), metrics);
    }

    let avg_accuracy = fields
        .iter()
        .map(|f| per_field.get(f).map_or(0.0, |m: &FieldMetrics| zero_if_nan(m.accuracy)))
        .sum::<f64>()
        / fields.len() as f64;

    Some(PartitionMetrics {
        per_field,
        avg_accuracy: round2(avg_accuracy),
    })
}
