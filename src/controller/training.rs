//! Training jobs
//!
//! One hyperparameter search per category at a time. The search runs on the
//! blocking pool; its winner is persisted as a staged model that must be activated
//! before it serves forecasts. Failed and cancelled runs never touch stored models.
//!
//! Dropping a run before it finishes cancels its search. The category stays claimed
//! until the search on the blocking pool has actually stopped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::{ModelHandle, ModelRegistry};
use crate::config::TrainingSettings;
use crate::dataset::prepare;
use crate::domain::{Category, ChartPoint, TimeSeriesRecord};
use crate::error::{ForecastError, Result};
use crate::ml::metrics::round2;
use crate::ml::training::{ConfigUsed, EpochStats};
use crate::ml::{
    BestModel, CandidateConfig, CandidateResult, FieldMetrics, HyperparameterSearch, PartitionMetrics, SearchEvent,
    SearchStatus, TrainingConfig,
};
use crate::store::{ModelMetadata, ModelStore};

/// Per-request overrides of the configured training settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainingOptions {
    /// Candidate configurations; the stock five when absent
    pub candidates: Option<Vec<CandidateConfig>>,
    pub epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub seed: Option<u64>,
}

impl TrainingOptions {
    pub fn training_config(&self, settings: &TrainingSettings) -> TrainingConfig {
        let mut config = settings.training_config();
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    NoEligibleModel,
    Failed,
}

impl From<SearchStatus> for RunStatus {
    fn from(status: SearchStatus) -> Self {
        match status {
            SearchStatus::Completed => Self::Completed,
            SearchStatus::Cancelled => Self::Cancelled,
            SearchStatus::NoEligibleModel => Self::NoEligibleModel,
        }
    }
}

/// The retrained winner as reported back to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestSummary {
    pub config: CandidateConfig,
    /// Averaged fold accuracy that won the selection
    pub score: f64,
    pub metrics: BTreeMap<String, FieldMetrics>,
    pub avg_accuracy: f64,
    pub test: Option<PartitionMetrics>,
    pub training: Option<PartitionMetrics>,
    pub chart_series: Vec<ChartPoint>,
    pub config_used: ConfigUsed,
    pub loss_history: Vec<EpochStats>,
}

impl From<&BestModel> for BestSummary {
    fn from(best: &BestModel) -> Self {
        Self {
            config: best.config.clone(),
            score: round2(best.score),
            metrics: best.run.metrics.clone(),
            avg_accuracy: round2(best.run.avg_accuracy),
            test: best.run.test.clone(),
            training: best.run.training.clone(),
            chart_series: best.run.chart_series.clone(),
            config_used: best.run.config_used.clone(),
            loss_history: best.run.loss_history.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub category: Category,
    pub status: RunStatus,
    pub history: Vec<CandidateResult>,
    pub best: Option<BestSummary>,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingProgress {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_event: Option<SearchEvent>,
}

struct Job {
    token: CancellationToken,
    progress: TrainingProgress,
}

type Jobs = Arc<Mutex<HashMap<Category, Job>>>;

/// Claim on a category's training slot, released on drop.
///
/// The running search holds a clone, so the claim outlives an abandoned caller.
struct JobGuard {
    jobs: Jobs,
    category: Category,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut jobs = self.jobs.lock();
        if jobs
            .get(&self.category)
            .map_or(false, |job| job.progress.run_id == self.run_id)
        {
            jobs.remove(&self.category);
        }
    }
}

pub struct TrainingService {
    settings: TrainingSettings,
    store: Arc<dyn ModelStore>,
    registry: Arc<ModelRegistry>,
    jobs: Jobs,
    reports: Mutex<HashMap<Category, TrainingReport>>,
}

impl TrainingService {
    pub fn new(settings: TrainingSettings, store: Arc<dyn ModelStore>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            settings,
            store,
            registry,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            reports: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self, category: Category) -> bool {
        self.jobs.lock().contains_key(&category)
    }

    pub fn progress(&self, category: Category) -> Option<TrainingProgress> {
        self.jobs.lock().get(&category).map(|job| job.progress.clone())
    }

    pub fn last_report(&self, category: Category) -> Option<TrainingReport> {
        self.reports.lock().get(&category).cloned()
    }

    /// Ask the running search for `category` to stop. Returns whether one was running.
    pub fn cancel(&self, category: Category) -> bool {
        match self.jobs.lock().get(&category) {
            Some(job) => {
                job.token.cancel();
                info!(category = category.key(), run_id = %job.progress.run_id, "Training cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Run a search for `category` and wait for its report
    pub async fn train(
        &self,
        category: Category,
        records: Vec<TimeSeriesRecord>,
        options: TrainingOptions,
    ) -> Result<TrainingReport> {
        let job = self.begin(category)?;
        self.run(Arc::new(job), records, options).await
    }

    /// Start a search in the background and return its run id.
    ///
    /// The report becomes available through [`TrainingService::last_report`].
    pub fn start(
        self: &Arc<Self>,
        category: Category,
        records: Vec<TimeSeriesRecord>,
        options: TrainingOptions,
    ) -> Result<Uuid> {
        let job = self.begin(category)?;
        let run_id = job.run_id;
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = service.run(Arc::new(job), records, options).await {
                warn!(category = category.key(), %run_id, error = %err, "Background training failed");
            }
        });
        Ok(run_id)
    }

    fn begin(&self, category: Category) -> Result<JobGuard> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&category) {
            return Err(ForecastError::TrainingInProgress(category));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let token = CancellationToken::new();
        jobs.insert(
            category,
            Job {
                token: token.clone(),
                progress: TrainingProgress {
                    run_id,
                    started_at,
                    last_event: None,
                },
            },
        );

        Ok(JobGuard {
            jobs: Arc::clone(&self.jobs),
            category,
            run_id,
            started_at,
            token,
        })
    }

    async fn run(
        &self,
        job: Arc<JobGuard>,
        records: Vec<TimeSeriesRecord>,
        options: TrainingOptions,
    ) -> Result<TrainingReport> {
        let category = job.category;
        info!(category = category.key(), run_id = %job.run_id, records = records.len(), "Training started");

        let cancel_on_drop = job.token.clone().drop_guard();
        let result = self.execute(&job, records, options).await;
        cancel_on_drop.disarm();

        match result {
            Ok(report) => {
                info!(
                    category = category.key(),
                    run_id = %job.run_id,
                    status = ?report.status,
                    "Training finished"
                );
                self.reports.lock().insert(category, report.clone());
                Ok(report)
            }
            Err(err) => {
                warn!(category = category.key(), run_id = %job.run_id, error = %err, "Training failed");
                let report = TrainingReport {
                    run_id: job.run_id,
                    category,
                    status: RunStatus::Failed,
                    history: Vec::new(),
                    best: None,
                    message: err.to_string(),
                    started_at: job.started_at,
                    finished_at: Utc::now(),
                };
                self.reports.lock().insert(category, report);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job: &Arc<JobGuard>,
        records: Vec<TimeSeriesRecord>,
        options: TrainingOptions,
    ) -> Result<TrainingReport> {
        let category = job.category;
        let run_id = job.run_id;
        let fields = category.field_keys();
        self.check_years(category, &records, &fields)?;

        let candidates = options.candidates.clone().unwrap_or_else(CandidateConfig::defaults);
        let search = HyperparameterSearch::new(options.training_config(&self.settings), self.settings.search.clone())
            .with_cancellation(job.token.clone())
            .with_run_id(run_id);
        let jobs = Arc::clone(&self.jobs);
        let claim = Arc::clone(job);

        let outcome = tokio::task::spawn_blocking(move || {
            let _claim = claim;
            let mut observer = |event: &SearchEvent| {
                debug!(category = category.key(), %run_id, ?event, "Search progress");
                if let Some(job) = jobs.lock().get_mut(&category) {
                    if job.progress.run_id == run_id {
                        job.progress.last_event = Some(event.clone());
                    }
                }
            };
            search.run(&records, &fields, &candidates, &mut observer)
        })
        .await??;

        let (best, message) = match (outcome.status, outcome.best) {
            (SearchStatus::Completed, Some(best)) => {
                self.persist(category, &best).await?;
                let message = format!(
                    "Configuration #{} won with {:.2}% average validation accuracy. Load the model to start forecasting.",
                    best.config.id, best.score
                );
                (Some(BestSummary::from(&best)), message)
            }
            (SearchStatus::Cancelled, _) => (None, "Training cancelled. Saved models were left unchanged.".to_string()),
            _ => (None, "No configuration produced a valid model.".to_string()),
        };

        Ok(TrainingReport {
            run_id,
            category,
            status: outcome.status.into(),
            history: outcome.history,
            best,
            message,
            started_at: job.started_at,
            finished_at: Utc::now(),
        })
    }

    fn check_years(&self, category: Category, records: &[TimeSeriesRecord], fields: &[String]) -> Result<()> {
        let missing = prepare(records, fields, 1, None).missing_years();
        if missing.is_empty() {
            return Ok(());
        }
        if self.settings.require_contiguous_years {
            return Err(ForecastError::insufficient(format!(
                "The {category} series is missing years {missing:?}"
            )));
        }
        warn!(category = category.key(), ?missing, "Series has gaps, windows will span missing years");
        Ok(())
    }

    async fn persist(&self, category: Category, best: &BestModel) -> Result<()> {
        let metadata = ModelMetadata::from_best(category, best);
        self.store
            .save_staged(category, best.run.network.to_artifacts(), metadata.clone())
            .await?;
        self.registry
            .stage(
                category,
                Arc::new(ModelHandle {
                    network: best.run.network.clone(),
                    metadata,
                }),
            )
            .await;
        info!(
            category = category.key(),
            id = best.config.id,
            avg_accuracy = best.run.avg_accuracy,
            "Staged trained model"
        );
        Ok(())
    }
}
