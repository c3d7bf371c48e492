use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use super::{error::ApiError, response::ApiResponse};
use crate::controller::{AppState, ModelInfo, TrainingOptions, TrainingProgress, TrainingReport};
use crate::domain::{aggregate_documents, Category, TimeSeriesRecord};
use crate::error::ForecastError;
use crate::ml::CandidateConfig;
use crate::store::{ModelMetadata, ModelPackage};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/models/import", post(import_model))
        .route("/models/:category", get(get_model).delete(delete_model))
        .route("/models/:category/train", post(train_model))
        .route("/models/:category/cancel", post(cancel_training))
        .route("/models/:category/activate", post(activate_model))
        .route("/models/:category/export", get(export_model))
        .route("/models/:category/forecast", get(get_forecast))
}

fn parse_category(raw: &str) -> Result<Category, ApiError> {
    Category::from_str(raw).map_err(|_| ApiError::NotFound(format!("Unknown category '{raw}'")))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[derive(Debug, Serialize)]
pub struct FieldInfo {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CategoryInfo {
    pub key: &'static str,
    pub label: &'static str,
    pub collection: &'static str,
    pub fields: Vec<FieldInfo>,
    pub active: bool,
    pub training: bool,
}

/// GET /api/v1/categories
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<CategoryInfo>> {
    let mut categories = Vec::new();
    for category in Category::all() {
        let spec = category.spec();
        categories.push(CategoryInfo {
            key: category.key(),
            label: spec.label,
            collection: spec.collection,
            fields: spec
                .fields
                .iter()
                .map(|f| FieldInfo {
                    key: f.key,
                    label: f.label,
                })
                .collect(),
            active: state.registry.is_active(category).await,
            training: state.training.is_running(category),
        });
    }
    let count = categories.len();
    Ok(Json(ApiResponse::success(categories).with_count(count)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub training: Option<TrainingProgress>,
    pub last_report: Option<TrainingReport>,
}

/// GET /api/v1/models/:category
pub async fn get_model(State(state): State<AppState>, Path(category): Path<String>) -> ApiResult<ModelStatus> {
    let category = parse_category(&category)?;
    let info = state.forecasting.info(category).await?;
    Ok(Json(ApiResponse::success(ModelStatus {
        info,
        training: state.training.progress(category),
        last_report: state.training.last_report(category),
    })))
}

/// Body of a training request.
///
/// Records are taken from `records`, else aggregated from raw `documents`, else the
/// category's sample series is used.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainRequest {
    pub records: Option<Vec<TimeSeriesRecord>>,
    pub documents: Option<Vec<Value>>,
    #[validate(length(min = 1, max = 20))]
    pub candidates: Option<Vec<CandidateConfig>>,
    #[validate(range(min = 1, max = 1000))]
    pub epochs: Option<usize>,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub learning_rate: Option<f64>,
    pub seed: Option<u64>,
    /// Block until the search finishes and return its report
    pub wait: bool,
}

impl TrainRequest {
    fn series(&self, category: Category) -> Vec<TimeSeriesRecord> {
        if let Some(records) = &self.records {
            records.clone()
        } else if let Some(documents) = &self.documents {
            aggregate_documents(category, documents)
        } else {
            category.fallback_series()
        }
    }

    fn options(&self) -> TrainingOptions {
        TrainingOptions {
            candidates: self.candidates.clone(),
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TrainResponse {
    Started {
        #[serde(rename = "runId")]
        run_id: Uuid,
    },
    Finished(TrainingReport),
}

/// POST /api/v1/models/:category/train
pub async fn train_model(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Json(req): Json<TrainRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TrainResponse>>), ApiError> {
    let category = parse_category(&category)?;
    req.validate()?;
    let series = req.series(category);

    if req.wait {
        let start = Instant::now();
        let report = state.training.train(category, series, req.options()).await?;
        let body = ApiResponse::success(TrainResponse::Finished(report)).with_duration(elapsed_ms(start));
        return Ok((StatusCode::OK, Json(body)));
    }

    let run_id = state.training.start(category, series, req.options())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(TrainResponse::Started { run_id })),
    ))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /api/v1/models/:category/cancel
pub async fn cancel_training(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<CancelResponse> {
    let category = parse_category(&category)?;
    let cancelled = state.training.cancel(category);
    Ok(Json(ApiResponse::success(CancelResponse { cancelled })))
}

/// POST /api/v1/models/:category/activate
///
/// Promotes the staged model when one is waiting, otherwise reloads the current one
pub async fn activate_model(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<ModelMetadata> {
    let category = parse_category(&category)?;
    let metadata = state.forecasting.activate(category).await?;
    Ok(Json(ApiResponse::success(metadata)))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// DELETE /api/v1/models/:category
pub async fn delete_model(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<DeleteResponse> {
    let category = parse_category(&category)?;
    if state.training.is_running(category) {
        return Err(ForecastError::TrainingInProgress(category).into());
    }
    if !state.forecasting.delete(category).await? {
        return Err(ForecastError::MissingArtifacts(category).into());
    }
    Ok(Json(ApiResponse::success(DeleteResponse { deleted: true })))
}

/// GET /api/v1/models/:category/export
///
/// The current model as a bare package, served as a download
pub async fn export_model(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let category = parse_category(&category)?;
    let package = state.forecasting.export(category).await?;
    let disposition = format!("attachment; filename=\"{}-model.json\"", category.key());
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(package)))
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub category: Category,
    pub metadata: ModelMetadata,
}

/// POST /api/v1/models/import
pub async fn import_model(State(state): State<AppState>, body: Bytes) -> ApiResult<ImportResponse> {
    let package = ModelPackage::from_json(&body)?;
    let category = package.category;
    if state.training.is_running(category) {
        return Err(ForecastError::TrainingInProgress(category).into());
    }
    let metadata = state.forecasting.import(package).await?;
    Ok(Json(ApiResponse::success(ImportResponse { category, metadata })))
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub periods: Option<usize>,
}

/// GET /api/v1/models/:category/forecast?periods=N
pub async fn get_forecast(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<crate::controller::ForecastResponse> {
    let category = parse_category(&category)?;
    let start = Instant::now();
    let response = state.forecasting.forecast(category, query.periods).await?;
    Ok(Json(ApiResponse::success(response).with_duration(elapsed_ms(start))))
}
