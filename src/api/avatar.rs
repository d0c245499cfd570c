use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::avatar::palette::{normalize_client_colors, normalize_client_scores};
use crate::avatar::AvatarSubmission;
use crate::llm::vision::PhotoUpload;
use crate::state::AppState;

pub const IMAGE_FIELD: &str = "avatarImage";

fn parse_json_field(name: &str, text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|err| {
        warn!("Ignoring unparseable {} field: {}", name, err);
        Value::Null
    })
}

fn text_value(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Reads an image part; empty files count as absent.
pub(crate) async fn read_upload(
    field: axum::extract::multipart::Field<'_>,
) -> Result<Option<PhotoUpload>, ApiError> {
    let file_name = field.file_name().map(str::to_string);
    let mime_type = field
        .content_type()
        .map(str::to_string)
        .filter(|value| !value.is_empty());
    let bytes = field.bytes().await?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(PhotoUpload {
        bytes: bytes.to_vec(),
        mime_type,
        file_name,
    }))
}

pub(crate) async fn read_submission(mut multipart: Multipart) -> Result<AvatarSubmission, ApiError> {
    let mut submission = AvatarSubmission::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            IMAGE_FIELD => submission.image = read_upload(field).await?,
            "photoScores" | "photoQuality" => {
                let text = field.text().await?;
                submission.photo_scores = normalize_client_scores(&parse_json_field(&name, &text));
            }
            "recommendedColors" => {
                let text = field.text().await?;
                submission.recommended_colors =
                    normalize_client_colors(&parse_json_field(&name, &text));
            }
            "avoidColors" => {
                let text = field.text().await?;
                submission.avoid_colors = normalize_client_colors(&parse_json_field(&name, &text));
            }
            "season" => submission.season = text_value(field.text().await?),
            "skinTone" => submission.skin_tone = text_value(field.text().await?),
            "undertone" => submission.undertone = text_value(field.text().await?),
            _ => {}
        }
    }
    Ok(submission)
}

pub async fn get_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let avatar = state.avatars.get(user_id).await?;
    Ok(Json(json!({ "ok": true, "avatar": avatar })))
}

pub async fn create_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let submission = read_submission(multipart).await?;
    let outcome = state.avatars.create(user_id, submission).await?;
    Ok(Json(json!({
        "ok": true,
        "avatar": outcome.avatar,
        "colorimetryFallback": outcome.colorimetry_fallback,
    })))
}

pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let submission = read_submission(multipart).await?;
    let avatar = state.avatars.update(user_id, submission).await?;
    Ok(Json(json!({ "ok": true, "avatar": avatar })))
}

pub async fn delete_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.avatars.delete(user_id).await?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}
