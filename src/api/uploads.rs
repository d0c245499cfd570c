use std::sync::Arc;

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::auth::OptionalUser;
use crate::api::avatar::read_upload;
use crate::api::error::ApiError;
use crate::db::models::TryOnResultInsert;
use crate::llm::vision::PhotoUpload;
use crate::state::AppState;
use crate::storage::{object_key, ObjectStore};
use crate::utils::media::{extension_for_mime, extension_from_name};

const ORIGINAL_FIELD: &str = "original";
const ORIGINAL_PREFIX: &str = "uploads";
const GENERATED_PREFIX: &str = "generated";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveImagesRequest {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub saved_as: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_id: Option<i64>,
}

struct Persistence<'a> {
    state: &'a AppState,
    objects: &'a Arc<dyn ObjectStore>,
    user_id: Option<i64>,
    product_id: Option<i64>,
    saved_as: Option<String>,
}

impl Persistence<'_> {
    /// Stores one image and records it. A failed record insert still reports the upload.
    async fn persist(
        &self,
        prefix: &str,
        bytes: Vec<u8>,
        content_type: &str,
        extension: &str,
    ) -> Option<(String, String, Option<i64>)> {
        let key = object_key(prefix, None, extension);
        if let Err(err) = self.objects.put(&key, bytes, content_type).await {
            warn!("Failed to upload {}: {}", key, err);
            return None;
        }
        let url = self.objects.public_url(&key);
        let insert = TryOnResultInsert {
            user_id: self.user_id,
            product_variant_id: self.product_id,
            result_url: url.clone(),
            saved_as: self.saved_as.clone(),
        };
        let inserted_id = match self.state.db.insert_try_on_result(&insert).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!("Failed to record try-on result {}: {}", key, err);
                None
            }
        };
        Some((key, url, inserted_id))
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Re-hosts generated looks (JSON list of URLs or data URIs) or raw files (multipart).
pub async fn save_images(
    State(state): State<AppState>,
    OptionalUser(user_id): OptionalUser,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    let objects = state.objects.as_ref().map_err(|err| err.clone())?;

    let uploaded = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        save_files(&state, objects, user_id, multipart).await?
    } else {
        let Json(body) = Json::<SaveImagesRequest>::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        save_remote(&state, objects, user_id, body).await?
    };

    info!("Stored {} try-on images for user {:?}", uploaded.len(), user_id);
    Ok(Json(json!({ "ok": true, "uploaded": uploaded })))
}

async fn save_remote(
    state: &AppState,
    objects: &Arc<dyn ObjectStore>,
    user_id: Option<i64>,
    body: SaveImagesRequest,
) -> Result<Vec<UploadedImage>, ApiError> {
    if body.images.is_empty() {
        return Err(ApiError::bad_request("No images provided"));
    }
    let persistence = Persistence {
        state,
        objects,
        user_id,
        product_id: body.product_id,
        saved_as: body.saved_as.clone(),
    };

    let mut uploaded = Vec::with_capacity(body.images.len());
    for source in &body.images {
        let image = match state.fetcher.fetch(source, state.sleeper.as_ref()).await {
            Ok(image) => image,
            Err(err) => {
                warn!("Skipping image, remote fetch failed: {}", err);
                continue;
            }
        };
        let extension = if source.starts_with("data:") {
            image.extension().to_string()
        } else {
            extension_from_name(source)
        };
        if let Some((key, url, inserted_id)) = persistence
            .persist(GENERATED_PREFIX, image.bytes, &image.mime_type, &extension)
            .await
        {
            uploaded.push(UploadedImage {
                original_url: (!source.starts_with("data:")).then(|| source.clone()),
                original_name: None,
                key,
                url,
                inserted_id,
            });
        }
    }
    Ok(uploaded)
}

async fn save_files(
    state: &AppState,
    objects: &Arc<dyn ObjectStore>,
    user_id: Option<i64>,
    mut multipart: Multipart,
) -> Result<Vec<UploadedImage>, ApiError> {
    let mut files: Vec<(String, PhotoUpload)> = Vec::new();
    let mut product_id = None;
    let mut saved_as = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            if let Some(upload) = read_upload(field).await? {
                files.push((name, upload));
            }
            continue;
        }
        match name.as_str() {
            "productId" => product_id = field.text().await?.trim().parse::<i64>().ok(),
            "savedAs" => {
                let text = field.text().await?;
                saved_as = Some(text.trim().to_string()).filter(|value| !value.is_empty());
            }
            _ => {}
        }
    }

    let persistence = Persistence {
        state,
        objects,
        user_id,
        product_id,
        saved_as,
    };
    let mut uploaded = Vec::with_capacity(files.len());
    for (field_name, upload) in files {
        let prefix = if field_name == ORIGINAL_FIELD {
            ORIGINAL_PREFIX
        } else {
            GENERATED_PREFIX
        };
        let content_type = upload.content_type();
        let extension = match upload.file_name.as_deref() {
            Some(name) if !name.trim().is_empty() => extension_from_name(name),
            _ => extension_for_mime(&content_type).to_string(),
        };
        if let Some((key, url, inserted_id)) = persistence
            .persist(prefix, upload.bytes, &content_type, &extension)
            .await
        {
            uploaded.push(UploadedImage {
                original_url: None,
                original_name: upload.file_name,
                key,
                url,
                inserted_id,
            });
        }
    }
    Ok(uploaded)
}
