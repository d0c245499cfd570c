use std::env;
use std::time::Duration;

use anyhow::Result;

const DEFAULT_VISION_DEPLOYMENT: &str = "gpt-5-nano";
const DEFAULT_VISION_API_VERSION: &str = "2024-12-01-preview";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// A required setting group is incomplete.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{component} is not configured; set {}", .missing.join(", "))]
pub struct ConfigError {
    pub component: &'static str,
    pub missing: Vec<&'static str>,
}

impl ConfigError {
    /// Collects the names of every blank value; `Ok` when all are present.
    pub fn check(component: &'static str, values: &[(&'static str, &str)]) -> Result<(), Self> {
        let missing: Vec<&'static str> = values
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { component, missing })
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisionSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub timeout: Duration,
    pub reply_language: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_attempts: usize,
    pub rate_limit_backoff: Duration,
    pub view_pacing: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database_url: String,
    pub bind_addr: String,
    pub vision: VisionSettings,
    pub generation: GenerationSettings,
    pub storage: StorageSettings,
    pub fetch: FetchSettings,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: env_string("DATABASE_URL", "sqlite://avatars.db?mode=rwc"),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
            vision: VisionSettings {
                endpoint: env_string("VISION_ENDPOINT", ""),
                api_key: env_string("VISION_API_KEY", ""),
                deployment: env_string("VISION_DEPLOYMENT", DEFAULT_VISION_DEPLOYMENT),
                api_version: env_string("VISION_API_VERSION", DEFAULT_VISION_API_VERSION),
                timeout: Duration::from_secs(env_u64("VISION_TIMEOUT_SECS", 60)),
                reply_language: env_string("AI_REPLY_LANGUAGE", "Spanish"),
            },
            generation: GenerationSettings {
                api_key: env_string("GEMINI_API_KEY", ""),
                base_url: env_string("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL),
                model: env_string("GEMINI_IMAGE_MODEL", DEFAULT_GEMINI_IMAGE_MODEL),
                timeout: Duration::from_secs(env_u64("TRYON_TIMEOUT_SECS", 120)),
                max_attempts: env_usize("TRYON_MAX_ATTEMPTS", 3).max(1),
                rate_limit_backoff: Duration::from_secs(env_u64(
                    "TRYON_RATE_LIMIT_BACKOFF_SECS",
                    25,
                )),
                view_pacing: Duration::from_secs(env_u64("TRYON_VIEW_PACING_SECS", 8)),
            },
            storage: StorageSettings {
                bucket: env_string("S3_BUCKET", ""),
                region: env_string("S3_REGION", ""),
                access_key_id: env_string("S3_ACCESS_KEY_ID", ""),
                secret_access_key: env_string("S3_SECRET_ACCESS_KEY", ""),
                endpoint: env_optional("S3_ENDPOINT"),
            },
            fetch: FetchSettings {
                timeout: Duration::from_secs(env_u64("IMAGE_FETCH_TIMEOUT_SECS", 30)),
                max_attempts: env_usize("IMAGE_FETCH_ATTEMPTS", 3).max(1),
                base_delay: Duration::from_millis(env_u64("IMAGE_FETCH_BACKOFF_MS", 500)),
                public_base_url: env_string("PUBLIC_BASE_URL", ""),
            },
        })
    }
}
