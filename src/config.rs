use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::ml::{SearchConfig, TrainingConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "EMIGRANT__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub training: TrainingSettings,
    pub forecast: ForecastSettings,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Model packages carry raw weight bytes as JSON arrays, so imports are large
    pub body_limit_bytes: usize,
    pub enable_cors: bool,
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            body_limit_bytes: 64 * 1024 * 1024,
            enable_cors: false,
            cors_origin: "http://localhost:5173".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub clip_norm: Option<f64>,
    pub seed: u64,
    /// Refuse to train on series with missing years instead of only warning
    pub require_contiguous_years: bool,
    pub search: SearchConfig,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let fit = TrainingConfig::default();
        Self {
            epochs: fit.epochs,
            learning_rate: fit.learning_rate,
            batch_size: fit.batch_size,
            clip_norm: fit.clip_norm,
            seed: fit.seed,
            require_contiguous_years: false,
            search: SearchConfig::default(),
        }
    }
}

impl TrainingSettings {
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            clip_norm: self.clip_norm,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub default_periods: usize,
    pub max_periods: usize,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            default_periods: 10,
            max_periods: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: PathBuf::from("data/models"),
        }
    }
}

impl Config {
    /// Built-in defaults, then `config/default.toml`, then `EMIGRANT__*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(figment.extract()?)
    }
}
