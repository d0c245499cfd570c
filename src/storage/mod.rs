pub mod s3;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::config::ConfigError;

pub use s3::S3ObjectStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("object storage operation failed: {0}")]
    ObjectStore(String),
    #[error("stored value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::ObjectStore(err.to_string())
    }
}

/// Bucket-style blob storage addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn public_url(&self, key: &str) -> String;
    /// Inverse of `public_url`; `None` for URLs this store did not produce.
    fn key_from_url(&self, url: &str) -> Option<String>;
}

/// `{prefix}/{owner}_{millis}_{rand6}.{ext}`, owner segment omitted when absent.
pub fn object_key(prefix: &str, owner: Option<i64>, extension: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
    let extension = extension.trim_start_matches('.');
    match owner {
        Some(owner) => format!("{prefix}/{owner}_{millis}_{suffix}.{extension}"),
        None => format!("{prefix}/{millis}_{suffix}.{extension}"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_follow_prefix_owner_layout() {
        let key = object_key("avatars", Some(42), "png");
        let name = key.strip_prefix("avatars/42_").unwrap();
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "png");
        let (millis, suffix) = stem.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 6);

        let generated = object_key("generated", None, ".jpg");
        assert!(generated.starts_with("generated/"));
        assert!(generated.ends_with(".jpg"));
        assert!(!generated.contains(".."));
    }
}
