use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{ModelMetadata, ModelStore};
use crate::domain::Category;
use crate::error::{ForecastError, Result};
use crate::ml::ModelArtifacts;

#[derive(Clone)]
struct Saved {
    artifacts: ModelArtifacts,
    metadata: ModelMetadata,
}

#[derive(Default)]
struct Entry {
    current: Option<Saved>,
    staged: Option<Saved>,
    loaded: bool,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.current.is_none() && self.staged.is_none()
    }
}

/// In-process store, used by tests and when no storage directory is configured
#[derive(Default)]
pub struct MemoryModelStore {
    entries: RwLock<HashMap<Category, Entry>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, category: Category, f: impl FnOnce(&Entry) -> Option<T>) -> Option<T> {
        self.entries.read().get(&category).and_then(f)
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn save(&self, category: Category, artifacts: ModelArtifacts, metadata: ModelMetadata) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries.entry(category).or_default();
        entry.current = Some(Saved { artifacts, metadata });
        entry.loaded = false;
        Ok(())
    }

    async fn load_artifacts(&self, category: Category) -> Result<ModelArtifacts> {
        self.read(category, |e| e.current.as_ref().map(|m| m.artifacts.clone()))
            .ok_or(ForecastError::MissingArtifacts(category))
    }

    async fn load_metadata(&self, category: Category) -> Result<Option<ModelMetadata>> {
        Ok(self.read(category, |e| e.current.as_ref().map(|m| m.metadata.clone())))
    }

    async fn save_staged(
        &self,
        category: Category,
        artifacts: ModelArtifacts,
        metadata: ModelMetadata,
    ) -> Result<()> {
        self.entries.write().entry(category).or_default().staged = Some(Saved { artifacts, metadata });
        Ok(())
    }

    async fn load_staged_artifacts(&self, category: Category) -> Result<ModelArtifacts> {
        self.read(category, |e| e.staged.as_ref().map(|m| m.artifacts.clone()))
            .ok_or(ForecastError::MissingArtifacts(category))
    }

    async fn load_staged_metadata(&self, category: Category) -> Result<Option<ModelMetadata>> {
        Ok(self.read(category, |e| e.staged.as_ref().map(|m| m.metadata.clone())))
    }

    async fn promote_staged(&self, category: Category) -> Result<bool> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&category) else {
            return Ok(false);
        };
        match entry.staged.take() {
            Some(staged) => {
                entry.current = Some(staged);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, category: Category) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .remove(&category)
            .map_or(false, |entry| !entry.is_empty()))
    }

    async fn mark_loaded(&self, category: Category) -> Result<()> {
        let mut entries = self.entries.write();
        match entries.get_mut(&category) {
            Some(entry) if entry.current.is_some() => {
                entry.loaded = true;
                Ok(())
            }
            _ => Err(ForecastError::MissingArtifacts(category)),
        }
    }

    async fn clear_loaded(&self, category: Category) -> Result<()> {
        if let Some(entry) = self.entries.write().get_mut(&category) {
            entry.loaded = false;
        }
        Ok(())
    }

    async fn is_loaded(&self, category: Category) -> Result<bool> {
        Ok(self.entries.read().get(&category).map_or(false, |e| e.loaded))
    }
}
