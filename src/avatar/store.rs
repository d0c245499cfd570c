use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::avatar::palette::{
    compact_palette, decode_photo_scores, encode_photo_scores, expand_palette,
};
use crate::avatar::types::{AvatarPayload, AvatarRecord, ColorProfile};
use crate::config::ConfigError;
use crate::db::models::{AvatarRow, AvatarUpsert};
use crate::db::Database;
use crate::llm::vision::PhotoUpload;
use crate::storage::{object_key, ObjectStore, StorageError};
use crate::utils::media::{extension_for_mime, extension_from_name};

const AVATAR_PREFIX: &str = "avatars";

fn record_from_row(row: AvatarRow) -> AvatarRecord {
    AvatarRecord {
        user_id: row.user_id,
        image_reference: row.image_url,
        photo_quality_scores: decode_photo_scores(row.photo_scores_json.as_deref()),
        created_at: row.created_at,
        color_profile: ColorProfile {
            season: row.season,
            skin_tone: row.skin_tone,
            undertone: row.undertone,
        },
        recommended_colors: expand_palette(row.recommended_colors_json.as_deref()),
        avoid_colors: expand_palette(row.avoid_colors_json.as_deref()),
    }
}

/// One avatar per user in SQLite, photo bytes in object storage.
#[derive(Clone)]
pub struct AvatarStore {
    db: Database,
    objects: Result<Arc<dyn ObjectStore>, ConfigError>,
}

impl AvatarStore {
    pub fn new(db: Database, objects: Result<Arc<dyn ObjectStore>, ConfigError>) -> Self {
        Self { db, objects }
    }

    fn objects(&self) -> Result<&Arc<dyn ObjectStore>, StorageError> {
        self.objects
            .as_ref()
            .map_err(|err| StorageError::Configuration(err.clone()))
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<AvatarRecord>, StorageError> {
        let row = self.db.fetch_avatar(user_id).await?;
        Ok(row.map(record_from_row))
    }

    /// Overwrites every field and the timestamp, then returns the stored record.
    pub async fn upsert(
        &self,
        user_id: i64,
        payload: &AvatarPayload,
    ) -> Result<AvatarRecord, StorageError> {
        let upsert = AvatarUpsert {
            user_id,
            image_url: payload.image_reference.clone(),
            photo_scores_json: encode_photo_scores(&payload.photo_scores)?,
            created_at: Utc::now(),
            season: payload.color_profile.season.clone(),
            skin_tone: payload.color_profile.skin_tone.clone(),
            undertone: payload.color_profile.undertone.clone(),
            recommended_colors_json: compact_palette(&payload.recommended_colors)?,
            avoid_colors_json: compact_palette(&payload.avoid_colors)?,
        };
        self.db.upsert_avatar(&upsert).await?;

        let row = self.db.fetch_avatar(user_id).await?.ok_or_else(|| {
            StorageError::Database(sqlx::Error::RowNotFound)
        })?;
        Ok(record_from_row(row))
    }

    /// Removes the record, then releases the backing image best-effort.
    pub async fn delete(&self, user_id: i64) -> Result<bool, StorageError> {
        let Some(row) = self.db.fetch_avatar(user_id).await? else {
            return Ok(false);
        };
        let removed = self.db.delete_avatar(user_id).await?;
        info!("Deleted avatar for user {}", user_id);
        if let Some(url) = row.image_url.as_deref() {
            self.release_image(url).await;
        }
        Ok(removed)
    }

    /// Stores the photo under `avatars/` and returns its public URL.
    pub async fn upload_image(
        &self,
        user_id: i64,
        upload: &PhotoUpload,
    ) -> Result<String, StorageError> {
        let objects = self.objects()?;
        let content_type = upload.content_type();
        let extension = match upload.file_name.as_deref() {
            Some(name) if !name.trim().is_empty() => extension_from_name(name),
            _ => extension_for_mime(&content_type).to_string(),
        };
        let key = object_key(AVATAR_PREFIX, Some(user_id), &extension);
        objects
            .put(&key, upload.bytes.clone(), &content_type)
            .await?;
        info!("Uploaded avatar image {} ({} bytes)", key, upload.bytes.len());
        Ok(objects.public_url(&key))
    }

    /// Deletes the object behind `url`; failures are only logged.
    pub async fn release_image(&self, url: &str) {
        let objects = match self.objects() {
            Ok(objects) => objects,
            Err(err) => {
                warn!("Cannot release avatar image {}: {}", url, err);
                return;
            }
        };
        let Some(key) = objects.key_from_url(url) else {
            warn!("Avatar image {} is not in object storage; nothing to release", url);
            return;
        };
        if let Err(err) = objects.delete(&key).await {
            warn!("Failed to delete avatar image {}: {}", key, err);
        }
    }
}
