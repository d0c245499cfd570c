use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

use crate::avatar::types::{AvatarRecord, PhotoScore, PhotoValidationResult};
use crate::llm::vision::PhotoUpload;
use crate::utils::http::get_http_client;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with an error body.
    #[error("{message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Server operations the avatar wizard depends on.
#[async_trait]
pub trait AvatarApi: Send + Sync {
    async fn validate_photo(&self, photo: &PhotoUpload) -> Result<PhotoValidationResult, ClientError>;
    async fn create_avatar(
        &self,
        photo: &PhotoUpload,
        scores: &[PhotoScore],
    ) -> Result<AvatarRecord, ClientError>;
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    result: PhotoValidationResult,
}

#[derive(Debug, Deserialize)]
struct AvatarResponse {
    avatar: Option<AvatarRecord>,
}

fn photo_part(photo: &PhotoUpload) -> Result<Part, ClientError> {
    let file_name = photo
        .file_name
        .clone()
        .unwrap_or_else(|| "avatar.jpg".to_string());
    Part::bytes(photo.bytes.clone())
        .file_name(file_name)
        .mime_str(&photo.content_type())
        .map_err(ClientError::Http)
}

/// Talks to the service over HTTP, identifying as `user_id`.
#[derive(Debug, Clone)]
pub struct HttpAvatarApi {
    base_url: String,
    user_id: i64,
}

impl HttpAvatarApi {
    pub fn new(base_url: &str, user_id: i64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
        }
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<Value, ClientError> {
        let response = get_http_client()
            .post(format!("{}{}", self.base_url, path))
            .header("x-user-id", self.user_id.to_string())
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request was not accepted")
                .to_string();
            return Err(ClientError::Rejected { status, message });
        }
        Ok(body)
    }
}

#[async_trait]
impl AvatarApi for HttpAvatarApi {
    async fn validate_photo(&self, photo: &PhotoUpload) -> Result<PhotoValidationResult, ClientError> {
        let form = Form::new().part("avatarImage", photo_part(photo)?);
        let body = self.post_form("/api/avatar/validate", form).await?;
        serde_json::from_value::<ValidateResponse>(body)
            .map(|response| response.result)
            .map_err(|err| ClientError::Decode(err.to_string()))
    }

    async fn create_avatar(
        &self,
        photo: &PhotoUpload,
        scores: &[PhotoScore],
    ) -> Result<AvatarRecord, ClientError> {
        let scores_json =
            serde_json::to_string(scores).map_err(|err| ClientError::Decode(err.to_string()))?;
        let form = Form::new()
            .part("avatarImage", photo_part(photo)?)
            .text("photoScores", scores_json);
        let body = self.post_form("/api/avatar", form).await?;
        serde_json::from_value::<AvatarResponse>(body)
            .map_err(|err| ClientError::Decode(err.to_string()))?
            .avatar
            .ok_or_else(|| ClientError::Decode("response carried no avatar".to_string()))
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::{AvatarApi, ClientError};
    use crate::avatar::types::{AvatarRecord, ColorProfile, PhotoScore, PhotoValidationResult};
    use crate::llm::vision::PhotoUpload;

    /// Validation outcomes keyed by file name. A gated outcome parks until `release`.
    #[derive(Default)]
    pub struct ScriptedAvatarApi {
        validations: Mutex<HashMap<String, (bool, Result<PhotoValidationResult, ClientError>)>>,
        gate: Notify,
        created: Mutex<Vec<(Option<String>, Vec<PhotoScore>)>>,
    }

    impl ScriptedAvatarApi {
        pub fn validation(
            self,
            file_name: &str,
            result: Result<PhotoValidationResult, ClientError>,
        ) -> Self {
            self.validations
                .lock()
                .insert(file_name.to_string(), (false, result));
            self
        }

        pub fn gated_validation(
            self,
            file_name: &str,
            result: Result<PhotoValidationResult, ClientError>,
        ) -> Self {
            self.validations
                .lock()
                .insert(file_name.to_string(), (true, result));
            self
        }

        pub fn release(&self) {
            self.gate.notify_one();
        }

        pub fn created(&self) -> Vec<(Option<String>, Vec<PhotoScore>)> {
            self.created.lock().clone()
        }
    }

    #[async_trait]
    impl AvatarApi for ScriptedAvatarApi {
        async fn validate_photo(
            &self,
            photo: &PhotoUpload,
        ) -> Result<PhotoValidationResult, ClientError> {
            let key = photo.file_name.clone().unwrap_or_default();
            let next = self.validations.lock().remove(&key);
            let Some((gated, result)) = next else {
                return Err(ClientError::Decode(format!("no scripted validation for {key}")));
            };
            if gated {
                self.gate.notified().await;
            }
            result
        }

        async fn create_avatar(
            &self,
            photo: &PhotoUpload,
            scores: &[PhotoScore],
        ) -> Result<AvatarRecord, ClientError> {
            self.created
                .lock()
                .push((photo.file_name.clone(), scores.to_vec()));
            Ok(AvatarRecord {
                user_id: 1,
                image_reference: Some(
                    "https://test-bucket.s3.us-east-1.amazonaws.com/avatars/1_1_abcdef.jpg"
                        .to_string(),
                ),
                photo_quality_scores: scores.to_vec(),
                created_at: Utc::now(),
                color_profile: ColorProfile::default(),
                recommended_colors: Vec::new(),
                avoid_colors: Vec::new(),
            })
        }
    }
}
