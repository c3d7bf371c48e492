//! End-to-end checks of the dataset, training and forecasting pipeline

use std::sync::Arc;
use std::time::Duration;

use emigrant_forecast::config::{Config, StorageBackend};
use emigrant_forecast::controller::{AppState, RunStatus, TrainingOptions};
use emigrant_forecast::dataset::prepare;
use emigrant_forecast::domain::{Category, TimeSeriesRecord};
use emigrant_forecast::ml::{
    forecast, CandidateConfig, LayerConfig, SequencePredictor, SplitConfig, Trainer, TrainingConfig,
};
use emigrant_forecast::store::{MemoryModelStore, ModelStore};
use emigrant_forecast::ForecastError;
use tempfile::TempDir;

fn fields() -> Vec<String> {
    vec!["male".to_string(), "female".to_string()]
}

fn linear_series() -> Vec<TimeSeriesRecord> {
    [
        (2018, 100.0, 90.0),
        (2019, 110.0, 95.0),
        (2020, 120.0, 100.0),
        (2021, 130.0, 105.0),
        (2022, 140.0, 110.0),
        (2023, 150.0, 115.0),
    ]
    .into_iter()
    .map(|(year, male, female)| TimeSeriesRecord::new(year, [("male", male), ("female", female)]))
    .collect()
}

fn basic_trainer() -> Trainer {
    Trainer::new(TrainingConfig {
        epochs: 200,
        learning_rate: 0.01,
        batch_size: 4,
        clip_norm: Some(5.0),
        seed: 42,
    })
}

fn quick_options() -> TrainingOptions {
    TrainingOptions {
        candidates: Some(vec![
            CandidateConfig::new(2, 2, vec![4], vec![0.1]),
            CandidateConfig::new(3, 3, vec![4], vec![0.0]),
        ]),
        epochs: Some(3),
        ..TrainingOptions::default()
    }
}

#[test]
fn basic_training_fits_a_linear_series() {
    let dataset = prepare(&linear_series(), &fields(), 3, None);
    assert_eq!(dataset.windows(), 3);

    let split = SplitConfig::explicit(vec![0, 1], vec![2], Vec::new());
    let run = basic_trainer()
        .train(&dataset, &split, &LayerConfig::new(vec![16], vec![0.0]))
        .unwrap();

    let validation = run.validation.as_ref().unwrap();
    assert_eq!(run.metrics, validation.per_field);
    assert!(run.test.is_none());
    for field in fields() {
        let metrics = run.metrics[&field];
        assert!(metrics.mae < 5.0, "{field}: {metrics}");
        assert!(metrics.accuracy > 95.0, "{field}: {metrics}");
    }
    assert!(run.loss_history.last().unwrap().loss < run.loss_history[0].loss);
}

#[test]
fn forecast_horizon_continues_after_last_year() {
    let dataset = prepare(&linear_series(), &fields(), 3, None);
    let split = SplitConfig::explicit(vec![0, 1], vec![2], Vec::new());
    let run = basic_trainer()
        .train(&dataset, &split, &LayerConfig::new(vec![16], vec![0.0]))
        .unwrap();

    let points = forecast(&run.network, &dataset, 2).unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].year, 2024);
    assert_eq!(points[1].year, 2025);
    for point in &points {
        assert_eq!(point.values.keys().cloned().collect::<Vec<_>>(), vec!["female", "male"]);
    }

    let json = serde_json::to_value(&points[0]).unwrap();
    assert_eq!(json["year"], 2024);
    assert!(json["values"]["male"].is_number());
}

#[test]
fn rollout_error_grows_with_the_horizon() {
    let dataset = prepare(&linear_series(), &fields(), 3, None);
    let split = SplitConfig::explicit(vec![0, 1], vec![2], Vec::new());
    let run = basic_trainer()
        .train(&dataset, &split, &LayerConfig::new(vec![16], vec![0.0]))
        .unwrap();

    // the series keeps rising by 10 and 5 a year
    let truth = [(160.0, 120.0), (170.0, 125.0), (180.0, 130.0)];
    let points = forecast(&run.network, &dataset, 3).unwrap();
    let errors: Vec<f64> = points
        .iter()
        .zip(truth)
        .map(|(point, (male, female))| {
            ((point.values["male"] - male).abs() + (point.values["female"] - female).abs()) / 2.0
        })
        .collect();
    assert!(
        errors.windows(2).all(|pair| pair[0] <= pair[1]),
        "each step feeds on earlier predictions, errors were {errors:?}"
    );

    // shorter horizons are prefixes of longer ones
    for periods in 1..3 {
        assert_eq!(forecast(&run.network, &dataset, periods).unwrap(), points[..periods]);
    }
}

#[test]
fn one_step_forecast_matches_direct_prediction() {
    let dataset = prepare(&linear_series(), &fields(), 3, None);
    let split = SplitConfig::explicit(vec![0, 1], vec![2], Vec::new());
    let run = Trainer::new(TrainingConfig {
        epochs: 5,
        ..TrainingConfig::default()
    })
    .train(&dataset, &split, &LayerConfig::new(vec![6], vec![0.2]))
    .unwrap();

    let rows = dataset.normalized.nrows();
    let window = dataset.normalized.slice(ndarray::s![rows - 3.., ..]);
    let direct = SequencePredictor::predict(&run.network, window).unwrap();
    let stats = dataset.ordered_stats();

    let point = &forecast(&run.network, &dataset, 1).unwrap()[0];
    for (col, field) in dataset.fields.iter().enumerate() {
        let expected = stats[col].denormalize(direct[col]);
        assert!((point.values[field] - expected).abs() < 1e-9);
    }
}

#[test]
fn validation_metrics_take_priority_over_test() {
    let dataset = prepare(&linear_series(), &fields(), 2, None);
    assert_eq!(dataset.windows(), 4);

    let split = SplitConfig::explicit(vec![0, 1], vec![2], vec![3]);
    let run = Trainer::new(TrainingConfig {
        epochs: 3,
        ..TrainingConfig::default()
    })
    .train(&dataset, &split, &LayerConfig::new(vec![4], vec![0.0]))
    .unwrap();

    assert_eq!(run.metrics, run.validation.as_ref().unwrap().per_field);
    assert!(run.test.is_some());
    for metrics in run.metrics.values() {
        assert!((0.0..=100.0).contains(&metrics.accuracy));
    }
}

#[test]
fn too_short_series_is_rejected_before_fitting() {
    let series: Vec<_> = linear_series().into_iter().take(2).collect();
    let dataset = prepare(&series, &fields(), 3, None);
    assert_eq!(dataset.windows(), 0);

    let err = basic_trainer()
        .train(&dataset, &SplitConfig::default(), &LayerConfig::default())
        .unwrap_err();
    assert!(matches!(err, ForecastError::InsufficientData(_)));
}

#[tokio::test]
async fn cancelled_training_keeps_the_active_model() {
    let state = AppState::with_store(Config::default(), Arc::new(MemoryModelStore::new()));
    let series = Category::Sex.fallback_series();

    state
        .training
        .train(Category::Sex, series.clone(), quick_options())
        .await
        .unwrap();
    let active = state.forecasting.activate(Category::Sex).await.unwrap();
    let before = state.forecasting.forecast(Category::Sex, Some(3)).await.unwrap();

    state
        .training
        .start(Category::Sex, series, TrainingOptions::default())
        .unwrap();
    assert!(state.training.cancel(Category::Sex));

    let mut waited = Duration::ZERO;
    while state.training.is_running(Category::Sex) {
        assert!(waited < Duration::from_secs(60), "cancelled run did not stop");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    let report = state.training.last_report(Category::Sex).unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.best.is_none());

    assert_eq!(state.store.load_metadata(Category::Sex).await.unwrap(), Some(active));
    assert!(state.store.is_loaded(Category::Sex).await.unwrap());
    let after = state.forecasting.forecast(Category::Sex, Some(3)).await.unwrap();
    assert_eq!(before.future_forecast, after.future_forecast);
}

#[tokio::test]
async fn retraining_keeps_the_active_model_until_activation() {
    let state = AppState::with_store(Config::default(), Arc::new(MemoryModelStore::new()));
    let series = Category::Sex.fallback_series();

    state
        .training
        .train(Category::Sex, series.clone(), quick_options())
        .await
        .unwrap();
    let active = state.forecasting.activate(Category::Sex).await.unwrap();
    let before = state.forecasting.forecast(Category::Sex, Some(3)).await.unwrap();

    let retrain = TrainingOptions {
        seed: Some(7),
        ..quick_options()
    };
    let report = state.training.train(Category::Sex, series, retrain).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);

    let after = state.forecasting.forecast(Category::Sex, Some(3)).await.unwrap();
    assert_eq!(before.future_forecast, after.future_forecast);
    assert_eq!(state.store.load_metadata(Category::Sex).await.unwrap(), Some(active.clone()));
    assert!(state.store.is_loaded(Category::Sex).await.unwrap());
    let info = state.forecasting.info(Category::Sex).await.unwrap();
    assert!(info.active && info.staged);

    let promoted = state.forecasting.activate(Category::Sex).await.unwrap();
    assert_ne!(promoted.trained_at, active.trained_at);
    assert_eq!(state.store.load_metadata(Category::Sex).await.unwrap(), Some(promoted));
    assert!(!state.forecasting.info(Category::Sex).await.unwrap().staged);
}

#[tokio::test]
async fn file_store_restores_active_models_on_startup() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.storage.backend = StorageBackend::File;
    cfg.storage.path = tmp.path().join("models");

    let first = AppState::new(cfg.clone()).await.unwrap();
    first
        .training
        .train(Category::CivilStatus, Category::CivilStatus.fallback_series(), quick_options())
        .await
        .unwrap();
    first.forecasting.activate(Category::CivilStatus).await.unwrap();
    let expected = first
        .forecasting
        .forecast(Category::CivilStatus, Some(4))
        .await
        .unwrap();
    drop(first);

    let second = AppState::new(cfg).await.unwrap();
    assert!(second.registry.is_active(Category::CivilStatus).await);
    let restored = second
        .forecasting
        .forecast(Category::CivilStatus, Some(4))
        .await
        .unwrap();

    assert_eq!(restored.future_forecast, expected.future_forecast);
    assert_eq!(restored.chart_series, expected.chart_series);
    assert_eq!(restored.fields, Category::CivilStatus.field_keys());
}

#[tokio::test]
async fn exported_package_forecasts_identically_elsewhere() {
    let source = AppState::with_store(Config::default(), Arc::new(MemoryModelStore::new()));
    source
        .training
        .train(Category::Sex, Category::Sex.fallback_series(), quick_options())
        .await
        .unwrap();
    source.forecasting.activate(Category::Sex).await.unwrap();

    let package = source.forecasting.export(Category::Sex).await.unwrap();
    let bytes = serde_json::to_vec(&package).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(json["model"]["weightData"].is_array());
    assert!(json["model"]["weightSpecs"].is_array());
    assert_eq!(json["metadata"]["category"], "sex");

    let target = AppState::with_store(Config::default(), Arc::new(MemoryModelStore::new()));
    let package = emigrant_forecast::store::ModelPackage::from_json(&bytes).unwrap();
    target.forecasting.import(package).await.unwrap();

    let a = source.forecasting.forecast(Category::Sex, Some(5)).await.unwrap();
    let b = target.forecasting.forecast(Category::Sex, Some(5)).await.unwrap();
    assert_eq!(a.future_forecast, b.future_forecast);
}
