use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info};

use crate::avatar::AvatarServiceError;
use crate::config::ConfigError;
use crate::llm::AiError;
use crate::storage::StorageError;
use crate::utils::media::FetchError;

/// Every failure a handler can report, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Configuration(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Configuration(config) => ApiError::Configuration(config),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AvatarServiceError> for ApiError {
    fn from(err: AvatarServiceError) -> Self {
        match err {
            AvatarServiceError::MissingImage(message) => ApiError::bad_request(message),
            AvatarServiceError::Storage(storage) => storage.into(),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Configuration(config) => ApiError::Configuration(config),
            AiError::InvalidImage(message) => ApiError::BadRequest(message),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidDataUri(message) => ApiError::BadRequest(message),
            other => ApiError::Upstream(format!("could not load image: {other}")),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", err.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, message);
        } else {
            info!("Request refused with {}: {}", status, message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode as UpstreamStatus;

    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let missing = ConfigError {
            component: "Vision model",
            missing: vec!["VISION_API_KEY"],
        };
        assert_eq!(
            ApiError::from(AiError::Configuration(missing.clone())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(AiError::upstream(UpstreamStatus::TOO_MANY_REQUESTS, "slow down")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(StorageError::Configuration(missing)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(AvatarServiceError::MissingImage("avatarImage file is required")).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn configuration_message_names_the_missing_setting() {
        let err = ApiError::from(ConfigError {
            component: "Object storage",
            missing: vec!["S3_BUCKET", "S3_REGION"],
        });
        assert_eq!(
            err.to_string(),
            "Object storage is not configured; set S3_BUCKET, S3_REGION"
        );
    }
}
