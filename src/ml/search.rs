//! Hyperparameter search
//!
//! Each candidate configuration is scored with up to three contiguous validation
//! folds inside the train+validation windows. The most recent windows are held out as
//! a test partition once per candidate and never used for selection. The best
//! non-baseline candidate is retrained on all train+validation windows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::lstm::MAX_DROPOUT;
use super::metrics::{round2, FieldMetrics, PartitionMetrics};
use super::training::{LayerConfig, SplitConfig, Trainer, TrainingConfig, TrainingRun};
use crate::dataset::{prepare, Dataset};
use crate::domain::TimeSeriesRecord;
use crate::error::{ForecastError, Result};

const DEFAULT_DROPOUT: f64 = 0.2;

/// One configuration to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub id: u32,
    pub lookback: usize,
    pub units: Vec<usize>,
    pub dropout: Vec<f64>,
}

impl CandidateConfig {
    pub fn new(id: u32, lookback: usize, units: Vec<usize>, dropout: Vec<f64>) -> Self {
        Self {
            id,
            lookback,
            units,
            dropout,
        }
    }

    /// The five stock configurations; #1 is the baseline
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(1, 3, vec![50, 50], vec![0.2, 0.2]),
            Self::new(2, 4, vec![64, 32], vec![0.3, 0.2]),
            Self::new(3, 5, vec![80, 40], vec![0.2, 0.15]),
            Self::new(4, 3, vec![96, 48], vec![0.25, 0.2]),
            Self::new(5, 6, vec![64, 64], vec![0.2, 0.2]),
        ]
    }

    /// Lookback of at least 2, at least one unit per layer (`[50, 50]` when no layers
    /// are given), and one dropout rate in `[0, 0.8]` per layer, padded with 0.2.
    pub fn sanitized(&self) -> Self {
        let units: Vec<usize> = if self.units.is_empty() {
            vec![50, 50]
        } else {
            self.units.iter().map(|&u| u.max(1)).collect()
        };
        let dropout = (0..units.len())
            .map(|i| match self.dropout.get(i) {
                Some(rate) if rate.is_finite() => rate.clamp(0.0, MAX_DROPOUT),
                Some(_) => 0.0,
                None => DEFAULT_DROPOUT,
            })
            .collect();
        Self {
            id: self.id,
            lookback: self.lookback.max(2),
            units,
            dropout,
        }
    }

    pub fn layers(&self) -> LayerConfig {
        LayerConfig::new(self.units.clone(), self.dropout.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Candidate never selected as best, only reported
    pub baseline_id: Option<u32>,
    pub max_folds: usize,
    /// Minimum windows a candidate's dataset needs
    pub min_windows: usize,
    /// Minimum yearly records for the whole search
    pub min_records: usize,
    pub test_fraction: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            baseline_id: Some(1),
            max_folds: 3,
            min_windows: 6,
            min_records: 5,
            test_fraction: 0.15,
        }
    }
}

/// Progress notifications, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SearchEvent {
    #[serde(rename_all = "camelCase")]
    CandidateStarted { id: u32, index: usize, total: usize, lookback: usize },
    #[serde(rename_all = "camelCase")]
    FoldFinished { id: u32, fold: usize, folds: usize, avg_accuracy: f64 },
    #[serde(rename_all = "camelCase")]
    CandidateFinished { id: u32, avg_accuracy: f64 },
    CandidateFailed { id: u32, message: String },
    Retraining { id: u32 },
}

/// One row of the search history. Failed candidates carry NaN metrics and the error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResult {
    pub id: u32,
    pub lookback: usize,
    pub units: Vec<usize>,
    pub dropout: Vec<f64>,
    pub metrics: BTreeMap<String, FieldMetrics>,
    pub avg_accuracy: f64,
    pub folds: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateResult {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchStatus {
    Completed,
    Cancelled,
    NoEligibleModel,
}

/// Winning candidate after its final retrain
#[derive(Debug, Clone)]
pub struct BestModel {
    pub config: CandidateConfig,
    /// Averaged fold accuracy that won the selection
    pub score: f64,
    pub dataset: Dataset,
    pub run: TrainingRun,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub run_id: Uuid,
    pub status: SearchStatus,
    pub history: Vec<CandidateResult>,
    pub best: Option<BestModel>,
}

struct CandidateScore {
    averaged: PartitionMetrics,
    folds: usize,
    dataset: Dataset,
    train_val: Vec<usize>,
    test: Vec<usize>,
}

/// Contiguous validation folds over `0..train_val`, each paired with the remaining
/// indices for training. The last fold takes the remainder.
pub fn fold_plan(train_val: usize, max_folds: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let folds = max_folds.max(1).min(train_val);
    if folds == 0 {
        return Vec::new();
    }
    let size = (train_val / folds).max(1);

    (0..folds)
        .map(|fold| {
            let start = fold * size;
            let end = if fold == folds - 1 {
                train_val
            } else {
                (start + size).min(train_val)
            };
            let train = (0..train_val).filter(|i| *i < start || *i >= end).collect();
            (train, (start..end).collect())
        })
        .collect()
}

pub struct HyperparameterSearch {
    training: TrainingConfig,
    config: SearchConfig,
    cancel: CancellationToken,
    run_id: Uuid,
}

impl HyperparameterSearch {
    pub fn new(training: TrainingConfig, config: SearchConfig) -> Self {
        Self {
            training,
            config,
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Tag log lines and the outcome with a caller-chosen id
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn trainer(&self) -> Trainer {
        Trainer::new(self.training.clone()).with_cancellation(self.cancel.clone())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ForecastError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Evaluate `candidates` on `series` and retrain the winner.
    ///
    /// Cancellation is not an error: it yields [`SearchStatus::Cancelled`] with the
    /// history gathered so far and no best model.
    pub fn run(
        &self,
        series: &[TimeSeriesRecord],
        fields: &[String],
        candidates: &[CandidateConfig],
        observer: &mut dyn FnMut(&SearchEvent),
    ) -> Result<SearchOutcome> {
        let run_id = self.run_id;
        let records = series.iter().filter(|r| r.year.is_some()).count();
        if records < self.config.min_records {
            return Err(ForecastError::insufficient(format!(
                "Need at least {} years of data to train the LSTM.",
                self.config.min_records
            )));
        }
        if candidates.is_empty() {
            return Err(ForecastError::InvalidConfig(
                "Provide at least one valid model configuration.".into(),
            ));
        }
        if fields.is_empty() {
            return Err(ForecastError::InvalidConfig("No fields to forecast".into()));
        }

        info!(%run_id, candidates = candidates.len(), records, "Starting hyperparameter search");

        let mut history = Vec::with_capacity(candidates.len());
        let mut leader: Option<(CandidateConfig, CandidateScore)> = None;
        let total = candidates.len();

        for (index, raw) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(run_id, history));
            }
            let candidate = raw.sanitized();
            observer(&SearchEvent::CandidateStarted {
                id: candidate.id,
                index,
                total,
                lookback: candidate.lookback,
            });

            match self.score_candidate(series, fields, &candidate, observer) {
                Ok(score) => {
                    let avg_accuracy = score.averaged.avg_accuracy;
                    info!(%run_id, id = candidate.id, avg_accuracy, folds = score.folds, "Candidate scored");
                    observer(&SearchEvent::CandidateFinished {
                        id: candidate.id,
                        avg_accuracy,
                    });
                    history.push(CandidateResult {
                        id: candidate.id,
                        lookback: candidate.lookback,
                        units: candidate.units.clone(),
                        dropout: candidate.dropout.clone(),
                        metrics: score.averaged.per_field.clone(),
                        avg_accuracy: round2(avg_accuracy),
                        folds: score.folds,
                        error: None,
                    });

                    let eligible = self.config.baseline_id != Some(candidate.id);
                    let improves = leader
                        .as_ref()
                        .map_or(true, |(_, best)| avg_accuracy > best.averaged.avg_accuracy);
                    if eligible && improves {
                        leader = Some((candidate, score));
                    }
                }
                Err(err) if err.is_cancelled() => {
                    return Ok(self.cancelled(run_id, history));
                }
                Err(err) => {
                    let message = format!("Candidate #{}: {}", candidate.id, err);
                    warn!(%run_id, id = candidate.id, error = %err, "Candidate failed");
                    observer(&SearchEvent::CandidateFailed {
                        id: candidate.id,
                        message: message.clone(),
                    });
                    history.push(CandidateResult {
                        id: candidate.id,
                        lookback: candidate.lookback,
                        metrics: fields.iter().map(|f| (f.clone(), FieldMetrics::failed())).collect(),
                        units: candidate.units,
                        dropout: candidate.dropout,
                        avg_accuracy: f64::NAN,
                        folds: 0,
                        error: Some(message),
                    });
                }
            }
        }

        let Some((config, score)) = leader else {
            info!(%run_id, "No eligible candidate produced a valid score");
            return Ok(SearchOutcome {
                run_id,
                status: SearchStatus::NoEligibleModel,
                history,
                best: None,
            });
        };

        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(run_id, history));
        }
        observer(&SearchEvent::Retraining { id: config.id });
        info!(%run_id, id = config.id, lookback = config.lookback, "Retraining best candidate");

        let split = SplitConfig::explicit(score.train_val, Vec::new(), score.test);
        let run = match self.trainer().train(&score.dataset, &split, &config.layers()) {
            Ok(run) => run,
            Err(err) if err.is_cancelled() => return Ok(self.cancelled(run_id, history)),
            Err(err) => return Err(err),
        };

        Ok(SearchOutcome {
            run_id,
            status: SearchStatus::Completed,
            history,
            best: Some(BestModel {
                score: score.averaged.avg_accuracy,
                config,
                dataset: score.dataset,
                run,
            }),
        })
    }

    fn cancelled(&self, run_id: Uuid, history: Vec<CandidateResult>) -> SearchOutcome {
        info!(%run_id, evaluated = history.len(), "Hyperparameter search cancelled");
        SearchOutcome {
            run_id,
            status: SearchStatus::Cancelled,
            history,
            best: None,
        }
    }

    fn score_candidate(
        &self,
        series: &[TimeSeriesRecord],
        fields: &[String],
        candidate: &CandidateConfig,
        observer: &mut dyn FnMut(&SearchEvent),
    ) -> Result<CandidateScore> {
        let dataset = prepare(series, fields, candidate.lookback, None);
        let total = dataset.windows();
        if total < self.config.min_windows {
            return Err(ForecastError::insufficient(format!(
                "Dataset split requires at least {} sequences, lookback {} gives {}",
                self.config.min_windows, candidate.lookback, total
            )));
        }

        let test_count = ((total as f64 * self.config.test_fraction).floor() as usize).max(1);
        let train_val = total.saturating_sub(test_count);
        if train_val < 2 {
            return Err(ForecastError::insufficient(
                "Not enough samples for training/validation split.",
            ));
        }
        let test: Vec<usize> = (train_val..total).collect();

        let trainer = self.trainer();
        let layers = candidate.layers();
        let plan = fold_plan(train_val, self.config.max_folds);
        let folds = plan.len();
        let mut fold_metrics = Vec::with_capacity(folds);

        for (fold, (train, validation)) in plan.into_iter().enumerate() {
            self.check_cancelled()?;
            let split = SplitConfig::explicit(train, validation, test.clone());
            let run = trainer.train(&dataset, &split, &layers)?;
            observer(&SearchEvent::FoldFinished {
                id: candidate.id,
                fold,
                folds,
                avg_accuracy: run.avg_accuracy,
            });
            fold_metrics.push(PartitionMetrics {
                per_field: run.metrics,
                avg_accuracy: run.avg_accuracy,
            });
            self.check_cancelled()?;
        }

        let averaged = PartitionMetrics::average(&fold_metrics, fields)
            .ok_or_else(|| ForecastError::insufficient("No successful fold runs for this configuration."))?;

        Ok(CandidateScore {
            averaged,
            folds,
            dataset,
            train_val: (0..train_val).collect(),
            test,
        })
    }
}
