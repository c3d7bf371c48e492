//! Dataset preparation
//!
//! Turns a list of yearly records into everything the trainer and forecaster need:
//! sorted raw records, per-field stats, the normalized matrix and the sliding
//! windows. Preparation never fails; callers check [`Dataset::windows`].

pub mod normalize;
pub mod sequence;

use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

use crate::domain::TimeSeriesRecord;

pub use normalize::{compute_stats, denormalize, normalize, FieldStats};
pub use sequence::build_windows;

pub type StatsMap = BTreeMap<String, FieldStats>;

/// Prepared, immutable training/inference dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Sorted records with every field coerced to a number
    pub raw_records: Vec<TimeSeriesRecord>,
    /// `records × fields`, column order follows `fields`
    pub normalized: Array2<f64>,
    pub stats: StatsMap,
    pub xs: Vec<Array2<f64>>,
    pub ys: Vec<Array1<f64>>,
    pub years: Vec<i32>,
    pub lookback: usize,
    pub fields: Vec<String>,
}

impl Dataset {
    /// Number of `(sequence, target)` windows
    pub fn windows(&self) -> usize {
        self.xs.len()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_records.is_empty()
    }

    pub fn last_year(&self) -> Option<i32> {
        self.years.last().copied()
    }

    /// Stats in `fields` order
    pub fn ordered_stats(&self) -> Vec<FieldStats> {
        self.fields
            .iter()
            .map(|f| self.stats.get(f).copied().unwrap_or_default())
            .collect()
    }

    /// Calendar years absent between the first and last record.
    ///
    /// Windows are built by position, so every gap shifts the windows that span it.
    pub fn missing_years(&self) -> Vec<i32> {
        self.years
            .windows(2)
            .flat_map(|pair| (pair[0] + 1)..pair[1])
            .collect()
    }
}

/// Prepare a dataset over `fields`.
///
/// Records without a year are dropped and the rest sorted ascending. When
/// `stats_override` holds stats for a field they are used verbatim; otherwise stats
/// are computed from the series.
pub fn prepare(
    series: &[TimeSeriesRecord],
    fields: &[String],
    lookback: usize,
    stats_override: Option<&StatsMap>,
) -> Dataset {
    let mut sorted: Vec<(i32, &TimeSeriesRecord)> = series
        .iter()
        .filter_map(|record| record.year.map(|year| (year, record)))
        .collect();
    sorted.sort_by_key(|(year, _)| *year);

    if sorted.is_empty() {
        return Dataset {
            raw_records: Vec::new(),
            normalized: Array2::zeros((0, fields.len())),
            stats: fields
                .iter()
                .map(|f| (f.clone(), FieldStats::empty()))
                .collect(),
            xs: Vec::new(),
            ys: Vec::new(),
            years: Vec::new(),
            lookback,
            fields: fields.to_vec(),
        };
    }

    let raw = Array2::from_shape_fn((sorted.len(), fields.len()), |(row, col)| {
        sorted[row].1.value(&fields[col])
    });

    let stats: StatsMap = fields
        .iter()
        .enumerate()
        .map(|(col, field)| {
            let stats = stats_override
                .and_then(|o| o.get(field).copied())
                .unwrap_or_else(|| compute_stats(&raw.column(col).to_vec()));
            (field.clone(), stats)
        })
        .collect();

    let mut normalized = raw.clone();
    for (col, field) in fields.iter().enumerate() {
        let field_stats = stats[field];
        normalized
            .column_mut(col)
            .mapv_inplace(|v| normalize(v, &field_stats));
    }

    let (xs, ys) = build_windows(normalized.view(), lookback);

    let years: Vec<i32> = sorted.iter().map(|(year, _)| *year).collect();
    let raw_records = years
        .iter()
        .zip(raw.rows())
        .map(|(year, row)| TimeSeriesRecord::new(*year, fields.iter().cloned().zip(row.iter().copied())))
        .collect();

    Dataset {
        raw_records,
        normalized,
        stats,
        xs,
        ys,
        years,
        lookback,
        fields: fields.to_vec(),
    }
}
