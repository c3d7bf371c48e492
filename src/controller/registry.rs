//! Per-category model slots
//!
//! A slot holds the network serving forecasts and, separately, the most recent
//! trained network waiting to be confirmed. Training only ever fills the staged
//! side; activation moves a network into the active side.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::Category;
use crate::error::{ForecastError, Result};
use crate::ml::LstmNetwork;
use crate::store::{ModelMetadata, StoredModel};

/// A restored network with the metadata needed to rebuild its dataset
#[derive(Debug)]
pub struct ModelHandle {
    pub network: LstmNetwork,
    pub metadata: ModelMetadata,
}

impl From<StoredModel> for ModelHandle {
    fn from(stored: StoredModel) -> Self {
        Self {
            network: stored.network,
            metadata: stored.metadata,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelSlot {
    /// Serving forecasts
    pub active: Option<Arc<ModelHandle>>,
    /// Trained, awaiting activation
    pub staged: Option<Arc<ModelHandle>>,
}

#[derive(Default)]
pub struct ModelRegistry {
    slots: RwLock<HashMap<Category, ModelSlot>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn slot(&self, category: Category) -> ModelSlot {
        self.slots.read().await.get(&category).cloned().unwrap_or_default()
    }

    /// Hold a freshly trained model. The active model keeps serving.
    pub async fn stage(&self, category: Category, handle: Arc<ModelHandle>) {
        self.slots.write().await.entry(category).or_default().staged = Some(handle);
    }

    /// Serve forecasts from `handle`. A staged model stays staged.
    pub async fn activate(&self, category: Category, handle: Arc<ModelHandle>) {
        self.slots.write().await.entry(category).or_default().active = Some(handle);
    }

    /// Serve forecasts from `handle`, which replaces the staged model
    pub async fn promote(&self, category: Category, handle: Arc<ModelHandle>) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(category).or_default();
        slot.active = Some(handle);
        slot.staged = None;
    }

    pub async fn remove(&self, category: Category) -> bool {
        self.slots.write().await.remove(&category).is_some()
    }

    pub async fn is_active(&self, category: Category) -> bool {
        self.slots
            .read()
            .await
            .get(&category)
            .map_or(false, |s| s.active.is_some())
    }

    /// The active model, or [`ForecastError::ModelNotActive`]
    pub async fn active(&self, category: Category) -> Result<Arc<ModelHandle>> {
        self.slots
            .read()
            .await
            .get(&category)
            .and_then(|slot| slot.active.clone())
            .ok_or(ForecastError::ModelNotActive(category))
    }

    pub async fn active_categories(&self) -> Vec<Category> {
        let slots = self.slots.read().await;
        let mut categories: Vec<Category> = slots
            .iter()
            .filter(|(_, slot)| slot.active.is_some())
            .map(|(category, _)| *category)
            .collect();
        categories.sort();
        categories
    }
}
