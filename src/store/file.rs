//! Directory-backed model store
//!
//! Layout per category:
//!
//! ```text
//! <root>/<category>/versions/<id>/model.json     topology + weight manifest
//! <root>/<category>/versions/<id>/weights.bin    little-endian weight bytes
//! <root>/<category>/versions/<id>/metadata.json
//! <root>/<category>/current                      id of the current model
//! <root>/<category>/staged                       id of the staged model
//! <root>/<category>/active                       present while the current model is loaded
//! ```
//!
//! A version directory is written under a temporary name and renamed into place
//! complete. Pointer files are replaced by rename, so a reader always sees the
//! three files of a single version.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ModelMetadata, ModelStore};
use crate::domain::Category;
use crate::error::{ForecastError, Result};
use crate::ml::{ModelArtifacts, NetworkTopology, WeightSpec};

const MODEL_FILE: &str = "model.json";
const WEIGHTS_FILE: &str = "weights.bin";
const METADATA_FILE: &str = "metadata.json";
const VERSIONS_DIR: &str = "versions";
const CURRENT_POINTER: &str = "current";
const STAGED_POINTER: &str = "staged";
const ACTIVE_FILE: &str = "active";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelManifest {
    topology: NetworkTopology,
    weight_specs: Vec<WeightSpec>,
}

pub struct FileModelStore {
    root: PathBuf,
}

impl FileModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, category: Category) -> PathBuf {
        self.root.join(category.key())
    }

    fn version_dir(&self, category: Category, id: &str) -> PathBuf {
        self.dir(category).join(VERSIONS_DIR).join(id)
    }

    /// Write a complete version directory and return its id
    async fn write_version(&self, category: Category, artifacts: ModelArtifacts, metadata: &ModelMetadata) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let versions = self.dir(category).join(VERSIONS_DIR);
        let tmp = versions.join(format!(".tmp-{id}"));
        fs::create_dir_all(&tmp).await?;

        let manifest = ModelManifest {
            topology: artifacts.topology,
            weight_specs: artifacts.weight_specs,
        };
        fs::write(tmp.join(WEIGHTS_FILE), &artifacts.weight_data).await?;
        fs::write(tmp.join(MODEL_FILE), serde_json::to_vec_pretty(&manifest)?).await?;
        fs::write(tmp.join(METADATA_FILE), serde_json::to_vec_pretty(metadata)?).await?;
        fs::rename(&tmp, versions.join(&id)).await?;

        debug!(
            category = category.key(),
            version = %id,
            bytes = artifacts.weight_data.len(),
            "Wrote model version"
        );
        Ok(id)
    }

    async fn read_pointer(&self, category: Category, pointer: &str) -> Result<Option<String>> {
        let raw = match fs::read_to_string(self.dir(category).join(pointer)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let id = raw.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ForecastError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("malformed {pointer} pointer for {category}"),
            )));
        }
        Ok(Some(id.to_string()))
    }

    /// Point `pointer` at version `id` by renaming a temporary file over it
    async fn write_pointer(&self, category: Category, pointer: &str, id: &str) -> Result<()> {
        let path = self.dir(category).join(pointer);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, id.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_pointer(&self, category: Category, pointer: &str) -> Result<()> {
        match fs::remove_file(self.dir(category).join(pointer)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Delete version `id` unless a pointer still refers to it
    async fn prune(&self, category: Category, id: &str) {
        for pointer in [CURRENT_POINTER, STAGED_POINTER] {
            match self.read_pointer(category, pointer).await {
                Ok(Some(current)) if current == id => return,
                Err(err) => {
                    warn!(category = category.key(), version = id, error = %err, "Keeping model version");
                    return;
                }
                _ => {}
            }
        }
        match fs::remove_dir_all(self.version_dir(category, id)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                warn!(category = category.key(), version = id, error = %err, "Could not remove model version");
            }
            _ => {}
        }
    }

    async fn read_artifacts(&self, category: Category, pointer: &str) -> Result<ModelArtifacts> {
        let id = self
            .read_pointer(category, pointer)
            .await?
            .ok_or(ForecastError::MissingArtifacts(category))?;
        let dir = self.version_dir(category, &id);
        let manifest = fs::read(dir.join(MODEL_FILE)).await.map_err(missing_as(category))?;
        let manifest: ModelManifest = serde_json::from_slice(&manifest)?;
        let weight_data = fs::read(dir.join(WEIGHTS_FILE)).await.map_err(missing_as(category))?;

        Ok(ModelArtifacts {
            topology: manifest.topology,
            weight_specs: manifest.weight_specs,
            weight_data,
        })
    }

    async fn read_metadata(&self, category: Category, pointer: &str) -> Result<Option<ModelMetadata>> {
        let Some(id) = self.read_pointer(category, pointer).await? else {
            return Ok(None);
        };
        let bytes = fs::read(self.version_dir(category, &id).join(METADATA_FILE))
            .await
            .map_err(missing_as(category))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

fn missing_as(category: Category) -> impl Fn(std::io::Error) -> ForecastError {
    move |err| {
        if err.kind() == ErrorKind::NotFound {
            ForecastError::MissingArtifacts(category)
        } else {
            ForecastError::Io(err)
        }
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save(&self, category: Category, artifacts: ModelArtifacts, metadata: ModelMetadata) -> Result<()> {
        let id = self.write_version(category, artifacts, &metadata).await?;
        self.clear_loaded(category).await?;
        let previous = self.read_pointer(category, CURRENT_POINTER).await?;
        self.write_pointer(category, CURRENT_POINTER, &id).await?;
        if let Some(previous) = previous {
            self.prune(category, &previous).await;
        }
        info!(category = category.key(), version = %id, "Saved model");
        Ok(())
    }

    async fn load_artifacts(&self, category: Category) -> Result<ModelArtifacts> {
        self.read_artifacts(category, CURRENT_POINTER).await
    }

    async fn load_metadata(&self, category: Category) -> Result<Option<ModelMetadata>> {
        self.read_metadata(category, CURRENT_POINTER).await
    }

    async fn save_staged(
        &self,
        category: Category,
        artifacts: ModelArtifacts,
        metadata: ModelMetadata,
    ) -> Result<()> {
        let id = self.write_version(category, artifacts, &metadata).await?;
        let previous = self.read_pointer(category, STAGED_POINTER).await?;
        self.write_pointer(category, STAGED_POINTER, &id).await?;
        if let Some(previous) = previous {
            self.prune(category, &previous).await;
        }
        info!(category = category.key(), version = %id, "Staged model");
        Ok(())
    }

    async fn load_staged_artifacts(&self, category: Category) -> Result<ModelArtifacts> {
        self.read_artifacts(category, STAGED_POINTER).await
    }

    async fn load_staged_metadata(&self, category: Category) -> Result<Option<ModelMetadata>> {
        self.read_metadata(category, STAGED_POINTER).await
    }

    async fn promote_staged(&self, category: Category) -> Result<bool> {
        let Some(id) = self.read_pointer(category, STAGED_POINTER).await? else {
            return Ok(false);
        };
        let previous = self.read_pointer(category, CURRENT_POINTER).await?;
        self.write_pointer(category, CURRENT_POINTER, &id).await?;
        self.remove_pointer(category, STAGED_POINTER).await?;
        if let Some(previous) = previous.filter(|p| *p != id) {
            self.prune(category, &previous).await;
        }
        info!(category = category.key(), version = %id, "Promoted staged model");
        Ok(true)
    }

    async fn delete(&self, category: Category) -> Result<bool> {
        let stored = self.read_pointer(category, CURRENT_POINTER).await?.is_some()
            || self.read_pointer(category, STAGED_POINTER).await?.is_some();
        match fs::remove_dir_all(self.dir(category)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
        if stored {
            info!(category = category.key(), "Deleted model");
        }
        Ok(stored)
    }

    async fn mark_loaded(&self, category: Category) -> Result<()> {
        if self.read_pointer(category, CURRENT_POINTER).await?.is_none() {
            return Err(ForecastError::MissingArtifacts(category));
        }
        fs::write(self.dir(category).join(ACTIVE_FILE), b"").await?;
        debug!(category = category.key(), "Marked model loaded");
        Ok(())
    }

    async fn clear_loaded(&self, category: Category) -> Result<()> {
        match fs::remove_file(self.dir(category).join(ACTIVE_FILE)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn is_loaded(&self, category: Category) -> Result<bool> {
        Ok(fs::try_exists(self.dir(category).join(ACTIVE_FILE)).await?)
    }
}
