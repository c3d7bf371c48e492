//! Model training
//!
//! Fits one network on a prepared dataset, then evaluates every window to build the
//! chart series and per-partition metrics.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::lstm::{LstmNetwork, NetworkTopology, MAX_DROPOUT};
use super::metrics::{compute_partition_metrics, FieldMetrics, PartitionMetrics};
use super::optimizer::Adam;
use crate::dataset::Dataset;
use crate::domain::ChartPoint;
use crate::error::{ForecastError, Result};

/// Fitting hyperparameters shared by every candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Global gradient norm limit, `None` to disable
    pub clip_norm: Option<f64>,
    /// Seeds weight initialization, batch shuffling and dropout
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.001,
            batch_size: 4,
            clip_norm: Some(5.0),
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ForecastError::InvalidConfig("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ForecastError::InvalidConfig("batch size must be at least 1".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ForecastError::InvalidConfig(format!(
                "learning rate {} must be positive",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Window indices per partition.
///
/// `None` selects the default policy for that partition; `Some(vec![])` is an
/// explicitly empty partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub train: Option<Vec<usize>>,
    pub validation: Option<Vec<usize>>,
    pub test: Option<Vec<usize>>,
}

impl SplitConfig {
    pub fn explicit(train: Vec<usize>, validation: Vec<usize>, test: Vec<usize>) -> Self {
        Self {
            train: Some(train),
            validation: Some(validation),
            test: Some(test),
        }
    }

    /// Resolve against `total` windows: 70% train, `max(1, 15%)` validation right
    /// after it, the rest test.
    pub fn resolve(&self, total: usize) -> Result<ResolvedSplit> {
        let train = self
            .train
            .clone()
            .unwrap_or_else(|| (0..(total as f64 * 0.7).floor() as usize).collect());

        let validation = self.validation.clone().unwrap_or_else(|| {
            let len = ((total as f64 * 0.15).floor() as usize).max(1);
            let start = train.len().min(total);
            (start..(start + len).min(total)).collect()
        });

        let test = self.test.clone().unwrap_or_else(|| {
            let used: BTreeSet<usize> = train.iter().chain(&validation).copied().collect();
            (0..total).filter(|i| !used.contains(i)).collect()
        });

        if let Some(index) = train.iter().chain(&validation).chain(&test).find(|&&i| i >= total) {
            return Err(ForecastError::InvalidSplit(format!(
                "window index {index} out of range for {total} windows"
            )));
        }
        if train.is_empty() {
            return Err(ForecastError::InvalidSplit(
                "Training split is empty. Adjust your dataset configuration.".into(),
            ));
        }

        Ok(ResolvedSplit {
            train,
            validation,
            test,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// Recurrent layer sizes and the dropout after each layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub units: Vec<usize>,
    pub dropout: Vec<f64>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            units: vec![50, 50],
            dropout: vec![0.2, 0.2],
        }
    }
}

impl LayerConfig {
    pub fn new(units: Vec<usize>, dropout: Vec<f64>) -> Self {
        Self { units, dropout }
    }

    /// Zero units become 1 and an empty stack becomes `[50, 50]`. A missing,
    /// non-finite or non-positive rate disables dropout for that layer.
    pub fn normalized(&self) -> Self {
        let units: Vec<usize> = if self.units.is_empty() {
            vec![50, 50]
        } else {
            self.units.iter().map(|&u| u.max(1)).collect()
        };
        let dropout = (0..units.len())
            .map(|i| match self.dropout.get(i) {
                Some(&rate) if rate.is_finite() && rate > 0.0 => rate.min(MAX_DROPOUT),
                _ => 0.0,
            })
            .collect();
        Self { units, dropout }
    }
}

/// What a run was actually trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUsed {
    pub lookback: usize,
    pub units: Vec<usize>,
    pub dropout: Vec<f64>,
    pub epochs: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub mae: f64,
    pub val_loss: Option<f64>,
    pub val_mae: Option<f64>,
}

/// A fitted network with its evaluation
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub network: LstmNetwork,
    /// Primary per-field metrics: validation, else test, else train
    pub metrics: BTreeMap<String, FieldMetrics>,
    pub avg_accuracy: f64,
    pub validation: Option<PartitionMetrics>,
    pub test: Option<PartitionMetrics>,
    pub training: Option<PartitionMetrics>,
    pub chart_series: Vec<ChartPoint>,
    pub config_used: ConfigUsed,
    pub loss_history: Vec<EpochStats>,
    pub split: ResolvedSplit,
}

pub struct Trainer {
    config: TrainingConfig,
    cancel: Option<CancellationToken>,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config, cancel: None }
    }

    /// Stop between epochs once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ForecastError::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn train(&self, dataset: &Dataset, split: &SplitConfig, layers: &LayerConfig) -> Result<TrainingRun> {
        self.config.validate()?;
        let total = dataset.windows();
        if total < 2 {
            return Err(ForecastError::insufficient(
                "Not enough historical data to train the model.",
            ));
        }

        let split = split.resolve(total)?;
        let layers = layers.normalized();
        let topology = NetworkTopology::new(
            dataset.num_fields(),
            dataset.lookback,
            layers.units.clone(),
            layers.dropout.clone(),
        );
        let mut network = LstmNetwork::new(topology, self.config.seed)?;
        let loss_history = self.fit(&mut network, dataset, &split)?;

        let chart_series = build_chart_series(&network, dataset)?;
        let validation = compute_partition_metrics(&chart_series, &dataset.fields, &split.validation);
        let test = compute_partition_metrics(&chart_series, &dataset.fields, &split.test);
        let training = compute_partition_metrics(&chart_series, &dataset.fields, &split.train);
        let primary = validation.as_ref().or(test.as_ref()).or(training.as_ref());

        Ok(TrainingRun {
            metrics: primary.map(|m| m.per_field.clone()).unwrap_or_default(),
            avg_accuracy: primary.map_or(0.0, |m| m.avg_accuracy),
            validation,
            test,
            training,
            chart_series,
            config_used: ConfigUsed {
                lookback: dataset.lookback,
                units: layers.units,
                dropout: layers.dropout,
                epochs: self.config.epochs,
                fields: dataset.fields.clone(),
            },
            loss_history,
            split,
            network,
        })
    }

    fn fit(&self, network: &mut LstmNetwork, dataset: &Dataset, split: &ResolvedSplit) -> Result<Vec<EpochStats>> {
        let mut optimizer = Adam::new(self.config.learning_rate);
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let mut order = split.train.clone();
        let mut history = Vec::with_capacity(self.config.epochs);

        for epoch in 1..=self.config.epochs {
            self.check_cancelled()?;
            order.shuffle(&mut rng);

            let mut loss = 0.0;
            let mut mae = 0.0;
            for batch in order.chunks(self.config.batch_size) {
                let xs: Vec<&Array2<f64>> = batch.iter().map(|&i| &dataset.xs[i]).collect();
                let ys: Vec<&Array1<f64>> = batch.iter().map(|&i| &dataset.ys[i]).collect();
                let stats = network.train_batch(&xs, &ys, &mut optimizer, self.config.clip_norm, &mut rng)?;
                loss += stats.loss * batch.len() as f64;
                mae += stats.mae * batch.len() as f64;
            }
            let seen = order.len() as f64;

            let validation = if split.validation.is_empty() {
                None
            } else {
                Some(network.evaluate(&dataset.xs, &dataset.ys, &split.validation)?)
            };

            let stats = EpochStats {
                epoch,
                loss: loss / seen,
                mae: mae / seen,
                val_loss: validation.map(|v| v.loss),
                val_mae: validation.map(|v| v.mae),
            };
            debug!(
                epoch,
                loss = stats.loss,
                mae = stats.mae,
                val_loss = ?stats.val_loss,
                "Epoch finished"
            );
            history.push(stats);
        }

        Ok(history)
    }
}

/// Denormalized actual vs. predicted values for every window
pub fn build_chart_series(network: &LstmNetwork, dataset: &Dataset) -> Result<Vec<ChartPoint>> {
    let stats = dataset.ordered_stats();
    let predictions = network.predict_batch(&dataset.xs)?;

    predictions
        .iter()
        .enumerate()
        .map(|(index, prediction)| {
            let row = index + dataset.lookback;
            let record = dataset
                .raw_records
                .get(row)
                .ok_or_else(|| ForecastError::shape(format!("no record for window {index}")))?;
            let year = record.year.unwrap_or_default();
            let actual = dataset
                .fields
                .iter()
                .map(|f| (f.clone(), record.value(f)))
                .collect();
            let predicted = dataset
                .fields
                .iter()
                .zip(prediction.iter().zip(&stats))
                .map(|(f, (value, s))| (f.clone(), s.denormalize(*value)))
                .collect();
            Ok(ChartPoint {
                year,
                actual,
                predicted,
            })
        })
        .collect()
}
