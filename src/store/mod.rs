//! Model persistence
//!
//! A saved model is two artifacts joined by category: the network artifacts
//! (topology, weight manifest, weight bytes) and a JSON metadata document holding
//! everything needed to rebuild the dataset at forecast time.
//!
//! Each category has a current model and, independently, a staged one. Training
//! writes only the staged model; [`ModelStore::promote_staged`] replaces the current
//! model with it. A per-category loaded flag marks whether the current model has
//! been confirmed for forecasting.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dataset::StatsMap;
use crate::domain::{Category, TimeSeriesRecord};
use crate::error::{ForecastError, Result};
use crate::ml::{BestModel, CandidateConfig, FieldMetrics, LstmNetwork, ModelArtifacts, NetworkTopology};

pub use file::FileModelStore;
pub use memory::MemoryModelStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub category: Category,
    pub fields: Vec<String>,
    pub field_labels: BTreeMap<String, String>,
    pub lookback: usize,
    pub stats: StatsMap,
    /// Records the model was trained on, replayed to seed forecasts
    pub raw_records: Vec<TimeSeriesRecord>,
    pub metrics: BTreeMap<String, FieldMetrics>,
    pub avg_accuracy: f64,
    #[serde(default)]
    pub best_config: Option<CandidateConfig>,
    pub trained_at: DateTime<Utc>,
}

impl ModelMetadata {
    /// Metadata for the winner of a search
    pub fn from_best(category: Category, best: &BestModel) -> Self {
        Self {
            category,
            fields: best.dataset.fields.clone(),
            field_labels: category.field_labels(),
            lookback: best.dataset.lookback,
            stats: best.dataset.stats.clone(),
            raw_records: best.dataset.raw_records.clone(),
            metrics: best.run.metrics.clone(),
            avg_accuracy: best.run.avg_accuracy,
            best_config: Some(best.config.clone()),
            trained_at: Utc::now(),
        }
    }

    /// Check the metadata describes a network with `topology`
    pub fn check_topology(&self, topology: &NetworkTopology) -> Result<()> {
        if self.fields.is_empty() {
            return Err(ForecastError::InvalidPackage("metadata lists no fields".into()));
        }
        if self.fields.len() != topology.input_size || self.fields.len() != topology.outputs {
            return Err(ForecastError::InvalidPackage(format!(
                "metadata lists {} fields, network takes {} and predicts {}",
                self.fields.len(),
                topology.input_size,
                topology.outputs
            )));
        }
        if self.lookback != topology.lookback {
            return Err(ForecastError::InvalidPackage(format!(
                "metadata lookback {} does not match network lookback {}",
                self.lookback, topology.lookback
            )));
        }
        if let Some(field) = self.fields.iter().find(|f| !self.stats.contains_key(*f)) {
            return Err(ForecastError::InvalidPackage(format!("no stats for field {field}")));
        }
        Ok(())
    }
}

/// Portable export of one category's model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPackage {
    pub category: Category,
    pub metadata: ModelMetadata,
    pub model: ModelArtifacts,
}

impl ModelPackage {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ForecastError::InvalidPackage(e.to_string()))
    }

    /// Rebuild the network and cross-check it against the metadata
    pub fn verify(&self) -> Result<LstmNetwork> {
        if self.metadata.category != self.category {
            return Err(ForecastError::InvalidPackage(format!(
                "package is for {} but metadata is for {}",
                self.category, self.metadata.category
            )));
        }
        let network =
            LstmNetwork::from_artifacts(&self.model).map_err(|e| ForecastError::InvalidPackage(e.to_string()))?;
        self.metadata.check_topology(network.topology())?;
        Ok(network)
    }
}

/// A restored network with its metadata
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub network: LstmNetwork,
    pub metadata: ModelMetadata,
}

impl StoredModel {
    fn restore(artifacts: &ModelArtifacts, metadata: ModelMetadata) -> Result<Self> {
        let network = LstmNetwork::from_artifacts(artifacts)?;
        metadata.check_topology(network.topology())?;
        Ok(Self { network, metadata })
    }
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Replace the current model for `category`. A saved model starts out not loaded.
    async fn save(&self, category: Category, artifacts: ModelArtifacts, metadata: ModelMetadata) -> Result<()>;

    async fn load_artifacts(&self, category: Category) -> Result<ModelArtifacts>;

    async fn load_metadata(&self, category: Category) -> Result<Option<ModelMetadata>>;

    /// Replace the staged model for `category`. The current model and its loaded
    /// flag are left alone.
    async fn save_staged(&self, category: Category, artifacts: ModelArtifacts, metadata: ModelMetadata)
        -> Result<()>;

    async fn load_staged_artifacts(&self, category: Category) -> Result<ModelArtifacts>;

    async fn load_staged_metadata(&self, category: Category) -> Result<Option<ModelMetadata>>;

    /// Make the staged model current in one step. Returns false when nothing was staged.
    async fn promote_staged(&self, category: Category) -> Result<bool>;

    /// Remove current and staged models and the loaded flag. Returns whether anything was stored.
    async fn delete(&self, category: Category) -> Result<bool>;

    async fn mark_loaded(&self, category: Category) -> Result<()>;

    async fn clear_loaded(&self, category: Category) -> Result<()>;

    async fn is_loaded(&self, category: Category) -> Result<bool>;

    async fn load(&self, category: Category) -> Result<StoredModel> {
        let metadata = self
            .load_metadata(category)
            .await?
            .ok_or(ForecastError::MissingArtifacts(category))?;
        let artifacts = self.load_artifacts(category).await?;
        StoredModel::restore(&artifacts, metadata)
    }

    async fn load_staged(&self, category: Category) -> Result<Option<StoredModel>> {
        let Some(metadata) = self.load_staged_metadata(category).await? else {
            return Ok(None);
        };
        let artifacts = self.load_staged_artifacts(category).await?;
        StoredModel::restore(&artifacts, metadata).map(Some)
    }

    async fn export(&self, category: Category) -> Result<ModelPackage> {
        let metadata = self
            .load_metadata(category)
            .await?
            .ok_or(ForecastError::MissingArtifacts(category))?;
        let model = self.load_artifacts(category).await?;
        Ok(ModelPackage {
            category,
            metadata,
            model,
        })
    }

    /// Verify and store a package as the current model. Nothing is written when
    /// verification fails.
    async fn import(&self, package: ModelPackage) -> Result<(Category, ModelMetadata)> {
        package.verify()?;
        let ModelPackage {
            category,
            metadata,
            model,
        } = package;
        self.save(category, model, metadata.clone()).await?;
        Ok((category, metadata))
    }
}
