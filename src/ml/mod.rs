//! Machine Learning Module
//!
//! Recurrent forecasting models for yearly emigrant counts:
//! - Stacked LSTM regression network with BPTT training
//! - Trainer with partition metrics and chart series
//! - k-fold hyperparameter search over candidate configurations
//! - Iterative multi-step forecasting

pub mod forecast;
pub mod lstm;
pub mod metrics;
pub mod optimizer;
pub mod search;
pub mod training;

pub use forecast::{forecast, ForecastState, Forecaster, SequencePredictor};
pub use lstm::{LstmNetwork, ModelArtifacts, NetworkTopology, WeightSpec};
pub use metrics::{compute_partition_metrics, FieldMetrics, PartitionMetrics};
pub use search::{
    BestModel, CandidateConfig, CandidateResult, HyperparameterSearch, SearchConfig, SearchEvent, SearchOutcome,
    SearchStatus,
};
pub use training::{LayerConfig, SplitConfig, Trainer, TrainingConfig, TrainingRun};
