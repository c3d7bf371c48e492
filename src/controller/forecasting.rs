//! Activation, forecasting and model package handling
//!
//! Forecasts only ever come from an active model. The dataset is rebuilt from the
//! records and stats stored in the model's metadata, so a restored or imported model
//! forecasts exactly like the one that was trained.
//!
//! A freshly trained model waits as the staged model until [`ForecastService::activate`]
//! promotes it; until then the previous model keeps serving.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::registry::{ModelHandle, ModelRegistry};
use crate::config::ForecastSettings;
use crate::dataset::prepare;
use crate::domain::{Category, ChartPoint, ForecastPoint};
use crate::error::{ForecastError, Result};
use crate::ml::training::build_chart_series;
use crate::ml::{forecast, FieldMetrics};
use crate::store::{ModelMetadata, ModelPackage, ModelStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub category: Category,
    pub fields: Vec<String>,
    pub field_labels: BTreeMap<String, String>,
    pub chart_series: Vec<ChartPoint>,
    pub future_forecast: Vec<ForecastPoint>,
    pub metrics: BTreeMap<String, FieldMetrics>,
    pub avg_accuracy: f64,
}

/// What is known about a category's model
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub category: Category,
    pub label: String,
    pub fields: Vec<String>,
    pub field_labels: BTreeMap<String, String>,
    pub stored: bool,
    pub staged: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_metadata: Option<ModelMetadata>,
}

pub struct ForecastService {
    settings: ForecastSettings,
    store: Arc<dyn ModelStore>,
    registry: Arc<ModelRegistry>,
}

impl ForecastService {
    pub fn new(settings: ForecastSettings, store: Arc<dyn ModelStore>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            settings,
            store,
            registry,
        }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    /// Make the staged model for `category` serve forecasts, or the current one
    /// when nothing is staged
    pub async fn activate(&self, category: Category) -> Result<ModelMetadata> {
        let Some(staged) = self.store.load_staged(category).await? else {
            return self.activate_current(category).await;
        };
        self.store.promote_staged(category).await?;
        self.store.mark_loaded(category).await?;
        let metadata = staged.metadata.clone();
        self.registry
            .promote(category, Arc::new(ModelHandle::from(staged)))
            .await;
        info!(
            category = category.key(),
            lookback = metadata.lookback,
            avg_accuracy = metadata.avg_accuracy,
            "Activated staged model"
        );
        Ok(metadata)
    }

    /// Serve the current model, leaving any staged model waiting
    async fn activate_current(&self, category: Category) -> Result<ModelMetadata> {
        let stored = self.store.load(category).await?;
        self.store.mark_loaded(category).await?;
        let metadata = stored.metadata.clone();
        self.registry
            .activate(category, Arc::new(ModelHandle::from(stored)))
            .await;
        info!(
            category = category.key(),
            lookback = metadata.lookback,
            avg_accuracy = metadata.avg_accuracy,
            "Activated model"
        );
        Ok(metadata)
    }

    /// Re-activate every model the store still flags as loaded
    pub async fn restore(&self) -> Vec<Category> {
        let mut restored = Vec::new();
        for category in Category::all() {
            match self.store.is_loaded(category).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(category = category.key(), error = %err, "Could not read loaded flag");
                    continue;
                }
            }
            match self.activate_current(category).await {
                Ok(_) => restored.push(category),
                Err(err) => {
                    warn!(category = category.key(), error = %err, "Could not restore active model");
                    if let Err(err) = self.store.clear_loaded(category).await {
                        warn!(category = category.key(), error = %err, "Could not clear loaded flag");
                    }
                }
            }
        }
        restored
    }

    /// Chart series and `periods` future years from the active model.
    ///
    /// `None` uses the configured default horizon.
    pub async fn forecast(&self, category: Category, periods: Option<usize>) -> Result<ForecastResponse> {
        let periods = periods.unwrap_or(self.settings.default_periods);
        if periods > self.settings.max_periods {
            return Err(ForecastError::InvalidConfig(format!(
                "periods must be at most {}",
                self.settings.max_periods
            )));
        }

        let handle = match self.registry.active(category).await {
            Ok(handle) => handle,
            Err(err) => {
                if self.store.load_metadata(category).await?.is_none()
                    && self.store.load_staged_metadata(category).await?.is_none()
                {
                    return Err(ForecastError::MissingArtifacts(category));
                }
                return Err(err);
            }
        };

        tokio::task::spawn_blocking(move || render(category, &handle, periods)).await?
    }

    pub async fn info(&self, category: Category) -> Result<ModelInfo> {
        let metadata = self.store.load_metadata(category).await?;
        let staged_metadata = self.store.load_staged_metadata(category).await?;
        Ok(ModelInfo {
            category,
            label: category.label().to_string(),
            fields: category.field_keys(),
            field_labels: category.field_labels(),
            stored: metadata.is_some(),
            staged: staged_metadata.is_some(),
            active: self.registry.is_active(category).await,
            metadata,
            staged_metadata,
        })
    }

    /// Remove the stored model and its slot. Returns whether a model was stored.
    pub async fn delete(&self, category: Category) -> Result<bool> {
        self.registry.remove(category).await;
        let deleted = self.store.delete(category).await?;
        info!(category = category.key(), deleted, "Deleted model");
        Ok(deleted)
    }

    pub async fn export(&self, category: Category) -> Result<ModelPackage> {
        self.store.export(category).await
    }

    /// Store a verified package as the current model and activate it
    pub async fn import(&self, package: ModelPackage) -> Result<ModelMetadata> {
        let (category, _) = self.store.import(package).await?;
        info!(category = category.key(), "Imported model package");
        self.activate_current(category).await
    }
}

/// Replay the stored records through `handle` and roll the forecast forward
fn render(category: Category, handle: &ModelHandle, periods: usize) -> Result<ForecastResponse> {
    let metadata = &handle.metadata;
    let dataset = prepare(
        &metadata.raw_records,
        &metadata.fields,
        metadata.lookback,
        Some(&metadata.stats),
    );
    let chart_series = build_chart_series(&handle.network, &dataset)?;
    let future_forecast = forecast(&handle.network, &dataset, periods)?;

    Ok(ForecastResponse {
        category,
        fields: metadata.fields.clone(),
        field_labels: metadata.field_labels.clone(),
        chart_series,
        future_forecast,
        metrics: metadata.metrics.clone(),
        avg_accuracy: metadata.avg_accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::sample_model;
    use crate::store::MemoryModelStore;

    async fn service_with_model(category: Category) -> ForecastService {
        let store: Arc<dyn ModelStore> = Arc::new(MemoryModelStore::new());
        let (artifacts, metadata) = sample_model(category, 11);
        store.save(category, artifacts, metadata).await.unwrap();
        ForecastService::new(ForecastSettings::default(), store, Arc::new(ModelRegistry::new()))
    }

    #[tokio::test]
    async fn test_unloaded_model_refuses_to_forecast() {
        let service = service_with_model(Category::Sex).await;
        let err = service.forecast(Category::Sex, Some(3)).await.unwrap_err();
        assert!(matches!(err, ForecastError::ModelNotActive(Category::Sex)));
    }

    #[tokio::test]
    async fn test_missing_model_is_reported() {
        let service = service_with_model(Category::Sex).await;
        let err = service.forecast(Category::CivilStatus, None).await.unwrap_err();
        assert!(matches!(err, ForecastError::MissingArtifacts(Category::CivilStatus)));
    }

    #[tokio::test]
    async fn test_forecast_after_activation() {
        let service = service_with_model(Category::Sex).await;
        service.activate(Category::Sex).await.unwrap();

        let response = service.forecast(Category::Sex, Some(4)).await.unwrap();
        assert_eq!(response.fields, Category::Sex.field_keys());
        assert_eq!(response.future_forecast.len(), 4);
        assert_eq!(response.future_forecast[0].year, 2023);
        assert_eq!(response.future_forecast[3].year, 2026);
        // 9 sample years with lookback 3
        assert_eq!(response.chart_series.len(), 6);
        assert!(response
            .future_forecast
            .iter()
            .all(|p| p.values.values().all(|v| v.is_finite())));

        let default_horizon = service.forecast(Category::Sex, None).await.unwrap();
        assert_eq!(default_horizon.future_forecast.len(), 10);
        assert_eq!(default_horizon.future_forecast[..4], response.future_forecast[..]);
    }

    #[tokio::test]
    async fn test_staged_model_waits_for_activation() {
        let service = service_with_model(Category::Sex).await;
        service.activate(Category::Sex).await.unwrap();
        let serving = service.forecast(Category::Sex, Some(3)).await.unwrap();

        let (artifacts, metadata) = sample_model(Category::Sex, 12);
        service
            .store
            .save_staged(Category::Sex, artifacts, metadata)
            .await
            .unwrap();
        let info = service.info(Category::Sex).await.unwrap();
        assert!(info.active && info.stored && info.staged);
        let still_serving = service.forecast(Category::Sex, Some(3)).await.unwrap();
        assert_eq!(still_serving.future_forecast, serving.future_forecast);

        service.activate(Category::Sex).await.unwrap();
        let promoted = service.forecast(Category::Sex, Some(3)).await.unwrap();
        assert_ne!(promoted.future_forecast, serving.future_forecast);
        let info = service.info(Category::Sex).await.unwrap();
        assert!(info.active && !info.staged);
        assert!(service.store.is_loaded(Category::Sex).await.unwrap());
    }

    #[tokio::test]
    async fn test_staged_only_model_is_not_missing() {
        let store: Arc<dyn ModelStore> = Arc::new(MemoryModelStore::new());
        let (artifacts, metadata) = sample_model(Category::Sex, 4);
        store.save_staged(Category::Sex, artifacts, metadata).await.unwrap();
        let service = ForecastService::new(ForecastSettings::default(), store, Arc::new(ModelRegistry::new()));

        assert!(matches!(
            service.forecast(Category::Sex, None).await,
            Err(ForecastError::ModelNotActive(Category::Sex))
        ));
        service.activate(Category::Sex).await.unwrap();
        assert_eq!(service.forecast(Category::Sex, Some(2)).await.unwrap().future_forecast.len(), 2);
    }

    #[tokio::test]
    async fn test_periods_above_limit_are_rejected() {
        let service = service_with_model(Category::Sex).await;
        service.activate(Category::Sex).await.unwrap();
        assert!(matches!(
            service.forecast(Category::Sex, Some(51)).await,
            Err(ForecastError::InvalidConfig(_))
        ));
        assert!(service
            .forecast(Category::Sex, Some(0))
            .await
            .unwrap()
            .future_forecast
            .is_empty());
    }

    #[tokio::test]
    async fn test_restore_reactivates_loaded_models() {
        let store: Arc<dyn ModelStore> = Arc::new(MemoryModelStore::new());
        let (artifacts, metadata) = sample_model(Category::CivilStatus, 2);
        store.save(Category::CivilStatus, artifacts, metadata).await.unwrap();
        store.mark_loaded(Category::CivilStatus).await.unwrap();

        let service = ForecastService::new(ForecastSettings::default(), store, Arc::new(ModelRegistry::new()));
        assert_eq!(service.restore().await, vec![Category::CivilStatus]);
        assert!(service.info(Category::CivilStatus).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_restore_leaves_staged_model_waiting() {
        let store: Arc<dyn ModelStore> = Arc::new(MemoryModelStore::new());
        let (artifacts, metadata) = sample_model(Category::Sex, 2);
        store.save(Category::Sex, artifacts, metadata.clone()).await.unwrap();
        store.mark_loaded(Category::Sex).await.unwrap();
        let (artifacts, staged) = sample_model(Category::Sex, 3);
        store.save_staged(Category::Sex, artifacts, staged.clone()).await.unwrap();

        let service = ForecastService::new(ForecastSettings::default(), store, Arc::new(ModelRegistry::new()));
        assert_eq!(service.restore().await, vec![Category::Sex]);
        let info = service.info(Category::Sex).await.unwrap();
        assert!(info.active);
        assert_eq!(info.metadata, Some(metadata));
        assert_eq!(info.staged_metadata, Some(staged));
    }

    #[tokio::test]
    async fn test_delete_deactivates() {
        let service = service_with_model(Category::Sex).await;
        service.activate(Category::Sex).await.unwrap();
        assert!(service.delete(Category::Sex).await.unwrap());

        let info = service.info(Category::Sex).await.unwrap();
        assert!(!info.stored);
        assert!(!info.active);
        assert!(!service.delete(Category::Sex).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_activates() {
        let source = service_with_model(Category::Sex).await;
        let package = source.export(Category::Sex).await.unwrap();

        let target = ForecastService::new(
            ForecastSettings::default(),
            Arc::new(MemoryModelStore::new()),
            Arc::new(ModelRegistry::new()),
        );
        let metadata = target.import(package).await.unwrap();
        assert_eq!(metadata.category, Category::Sex);
        assert!(target.info(Category::Sex).await.unwrap().active);

        source.activate(Category::Sex).await.unwrap();
        let a = source.forecast(Category::Sex, Some(5)).await.unwrap();
        let b = target.forecast(Category::Sex, Some(5)).await.unwrap();
        assert_eq!(a.future_forecast, b.future_forecast);
        assert_eq!(a.chart_series, b.chart_series);
    }
}
