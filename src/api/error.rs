use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::response::ApiResponse;
use crate::error::ForecastError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InternalError(_) => "InternalServerError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let body = ApiResponse::<()>::error(message).with_code(self.error_type());
        (status, Json(body)).into_response()
    }
}

impl From<ForecastError> for ApiError {
    fn from(error: ForecastError) -> Self {
        let message = error.to_string();
        match error {
            ForecastError::MissingArtifacts(_) => ApiError::NotFound(message),
            ForecastError::ModelNotActive(_)
            | ForecastError::TrainingInProgress(_)
            | ForecastError::Cancelled => ApiError::Conflict(message),
            ForecastError::InsufficientData(_)
            | ForecastError::InvalidConfig(_)
            | ForecastError::InvalidSplit(_)
            | ForecastError::InvalidPackage(_) => ApiError::BadRequest(message),
            ForecastError::Shape(_) | ForecastError::Io(_) | ForecastError::Json(_) | ForecastError::Join(_) => {
                ApiError::InternalError(message)
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use rstest::rstest;

    #[rstest]
    #[case(ForecastError::MissingArtifacts(Category::Sex), StatusCode::NOT_FOUND)]
    #[case(ForecastError::ModelNotActive(Category::Sex), StatusCode::CONFLICT)]
    #[case(ForecastError::TrainingInProgress(Category::CivilStatus), StatusCode::CONFLICT)]
    #[case(ForecastError::insufficient("too short"), StatusCode::BAD_REQUEST)]
    #[case(ForecastError::InvalidPackage("bad".into()), StatusCode::BAD_REQUEST)]
    #[case(ForecastError::shape("3 != 4"), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(ForecastError::Join("panicked".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_forecast_error_status(#[case] error: ForecastError, #[case] status: StatusCode) {
        assert_eq!(ApiError::from(error).status_code(), status);
    }

    #[test]
    fn test_error_types() {
        assert_eq!(ApiError::NotFound("test".to_string()).error_type(), "NotFound");
        assert_eq!(ApiError::Conflict("test".to_string()).error_type(), "Conflict");
        assert_eq!(
            ApiError::ValidationError("test".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_client_error_keeps_message() {
        let error = ApiError::from(ForecastError::ModelNotActive(Category::CivilStatus));
        assert_eq!(
            error.to_string(),
            "Conflict: The saved Civil Status model is staged but not loaded"
        );
    }
}
