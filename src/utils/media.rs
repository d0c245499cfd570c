use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use tracing::warn;

use crate::config::FetchSettings;
use crate::utils::http::get_http_client;
use crate::utils::retry::{retry_with_backoff, RetryPolicy, Sleeper};

const FETCH_ERROR_BODY_LIMIT: usize = 800;
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([a-zA-Z0-9]{2,5})(?:\?|$)").expect("valid extension regex"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("remote image returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("remote image request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
}

impl FetchError {
    /// Timeouts, connection failures and 5xx are worth another attempt; 4xx is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            FetchError::Http(err) => err.is_timeout() || err.is_connect() || err.is_body(),
            FetchError::InvalidDataUri(_) => false,
        }
    }
}

/// Raw image bytes plus the MIME type they were served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl FetchedImage {
    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// `image/jpeg; charset=binary` -> `image/jpeg`
pub fn strip_mime_parameters(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match strip_mime_parameters(mime_type).as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" | "image/heif" => "heic",
        _ => "jpg",
    }
}

/// Extension taken from a file name or URL path, `jpg` when none is recognizable.
pub fn extension_from_name(name: &str) -> String {
    EXTENSION_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|ext| ext.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

/// Decodes `data:<mime>;base64,<payload>`.
pub fn decode_data_uri(value: &str) -> Result<FetchedImage, FetchError> {
    let Some(rest) = value.strip_prefix("data:") else {
        return Err(FetchError::InvalidDataUri("missing data: prefix".to_string()));
    };
    let mut parts = rest.splitn(2, ',');
    let header = parts.next().unwrap_or_default();
    let Some(payload) = parts.next() else {
        return Err(FetchError::InvalidDataUri("missing payload".to_string()));
    };
    if !header.ends_with(";base64") {
        return Err(FetchError::InvalidDataUri(
            "only base64 payloads are supported".to_string(),
        ));
    }

    let mime_type = strip_mime_parameters(header);
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|err| FetchError::InvalidDataUri(err.to_string()))?;
    let mime_type = if mime_type.is_empty() {
        detect_mime_type(&bytes).unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string())
    } else {
        mime_type
    };
    Ok(FetchedImage { bytes, mime_type })
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

/// Pulls remote images with a bounded per-attempt timeout and exponential backoff.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    timeout: Duration,
    policy: RetryPolicy,
    public_base_url: String,
}

impl ImageFetcher {
    pub fn new(settings: &FetchSettings) -> Self {
        Self {
            timeout: settings.timeout,
            policy: RetryPolicy::exponential(settings.max_attempts, settings.base_delay),
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Relative paths are served by the storefront itself.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:") {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.public_base_url, url)
        } else {
            format!("{}/{}", self.public_base_url, url)
        }
    }

    pub async fn fetch(&self, url: &str, sleeper: &dyn Sleeper) -> Result<FetchedImage, FetchError> {
        let url = self.resolve_url(url);
        if url.starts_with("data:") {
            return decode_data_uri(&url);
        }

        retry_with_backoff(
            &self.policy,
            sleeper,
            |err: &FetchError| {
                let retry = err.is_retryable();
                if retry {
                    warn!("Image fetch for {} failed, retrying: {}", url, err);
                }
                retry
            },
            |attempt| self.fetch_once(&url, attempt),
        )
        .await
    }

    async fn fetch_once(&self, url: &str, attempt: usize) -> Result<FetchedImage, FetchError> {
        let response = get_http_client()
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    "Failed to fetch image {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt,
                    self.policy.max_attempts
                );
                FetchError::Http(err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: truncate_for_log(&body, FETCH_ERROR_BODY_LIMIT),
            });
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(strip_mime_parameters)
            .filter(|value| !value.is_empty() && value != "application/octet-stream");
        let bytes = response.bytes().await?.to_vec();
        let mime_type = header_mime
            .or_else(|| detect_mime_type(&bytes))
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());

        Ok(FetchedImage { bytes, mime_type })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::stalled_server;
    use super::*;
    use crate::utils::retry::testing::RecordingSleeper;

    fn fetcher() -> ImageFetcher {
        ImageFetcher::new(&FetchSettings {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            public_base_url: "https://shop.example/".to_string(),
        })
    }

    #[test]
    fn decodes_base64_data_uri() {
        let image = decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.extension(), "png");
    }

    #[test]
    fn rejects_non_base64_data_uri() {
        assert!(matches!(
            decode_data_uri("data:text/plain,hello"),
            Err(FetchError::InvalidDataUri(_))
        ));
        assert!(decode_data_uri("https://cdn.example/a.png").is_err());
    }

    #[test]
    fn relative_paths_use_public_base_url() {
        let fetcher = fetcher();
        assert_eq!(
            fetcher.resolve_url("/img/shirt.png"),
            "https://shop.example/img/shirt.png"
        );
        assert_eq!(
            fetcher.resolve_url("https://cdn.example/a.png"),
            "https://cdn.example/a.png"
        );
    }

    #[test]
    fn extension_comes_from_name_or_defaults() {
        assert_eq!(extension_from_name("selfie.PNG"), "png");
        assert_eq!(extension_from_name("https://cdn.example/a.webp?x=1"), "webp");
        assert_eq!(extension_from_name("no-extension"), "jpg");
    }

    #[tokio::test]
    async fn stalled_host_times_out_on_every_attempt() {
        let (url, mut accepted) = stalled_server().await;
        let fetcher = ImageFetcher::new(&FetchSettings {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            public_base_url: "https://shop.example".to_string(),
        });
        let sleeper = RecordingSleeper::default();

        let err = fetcher.fetch(&url, &sleeper).await.unwrap_err();
        assert!(matches!(&err, FetchError::Http(inner) if inner.is_timeout()));
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), accepted.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let not_found = FetchError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        let unavailable = FetchError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(!not_found.is_retryable());
        assert!(unavailable.is_retryable());
    }
}
