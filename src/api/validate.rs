use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::AuthUser;
use crate::api::avatar::{read_upload, IMAGE_FIELD};
use crate::api::error::ApiError;
use crate::llm::vision::PhotoSource;
use crate::state::AppState;

/// A rejected photo is still a 200; only a failed check is an error.
pub async fn validate_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let validator = state.validator.as_ref().map_err(|err| err.clone())?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            upload = read_upload(field).await?;
        }
    }
    let upload = upload.ok_or_else(|| ApiError::bad_request("avatarImage file is required"))?;

    let result = validator
        .validate(&PhotoSource::Upload(upload), &[("userId", user_id.to_string())])
        .await?;
    Ok(Json(json!({ "ok": true, "result": result })))
}
