pub mod forecasting;
pub mod registry;
pub mod training;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::store::{FileModelStore, MemoryModelStore, ModelStore};

pub use forecasting::{ForecastResponse, ForecastService, ModelInfo};
pub use registry::{ModelHandle, ModelRegistry, ModelSlot};
pub use training::{RunStatus, TrainingOptions, TrainingProgress, TrainingReport, TrainingService};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub store: Arc<dyn ModelStore>,
    pub registry: Arc<ModelRegistry>,
    pub training: Arc<TrainingService>,
    pub forecasting: Arc<ForecastService>,
}

impl AppState {
    /// Open the configured store and re-activate models that were loaded at shutdown
    pub async fn new(cfg: Config) -> Result<Self> {
        let store: Arc<dyn ModelStore> = match cfg.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryModelStore::new()),
            StorageBackend::File => {
                tokio::fs::create_dir_all(&cfg.storage.path).await?;
                Arc::new(FileModelStore::new(&cfg.storage.path))
            }
        };
        info!(backend = ?cfg.storage.backend, path = %cfg.storage.path.display(), "Opened model store");

        let state = Self::with_store(cfg, store);
        let restored = state.forecasting.restore().await;
        if !restored.is_empty() {
            info!(?restored, "Restored active models");
        }
        Ok(state)
    }

    pub fn with_store(cfg: Config, store: Arc<dyn ModelStore>) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let training = Arc::new(TrainingService::new(
            cfg.training.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        let forecasting = Arc::new(ForecastService::new(
            cfg.forecast.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
        ));

        Self {
            cfg,
            store,
            registry,
            training,
            forecasting,
        }
    }
}
