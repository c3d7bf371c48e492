//! Emigrant statistics forecasting service
//!
//! Yearly emigrant counts per category are normalized, windowed and fitted with a
//! stacked LSTM selected by k-fold hyperparameter search. Trained models are stored
//! per category, activated explicitly and forecast years ahead over an HTTP API.

pub mod api;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod ml;
pub mod store;
pub mod telemetry;

pub use error::{ForecastError, Result};
