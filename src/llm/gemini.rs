use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{ConfigError, GenerationSettings};
use crate::llm::errors::{truncate_for_log, AiError};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_ai_timing;

/// Base64 image payload as Gemini sends and receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    fn to_part(&self) -> Value {
        json!({ "inlineData": { "mimeType": self.mime_type, "data": self.data } })
    }
}

/// Images first, then the instruction text.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub operation: String,
    pub images: Vec<InlineImage>,
    pub prompt: String,
}

impl GenerationRequest {
    fn to_payload(&self) -> Value {
        let mut parts: Vec<Value> = self.images.iter().map(InlineImage::to_part).collect();
        parts.push(json!({ "text": self.prompt }));
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
        })
    }
}

#[async_trait]
pub trait ImageGenerationBackend: Send + Sync {
    /// `Ok(None)` when the model answered without producing an image.
    async fn generate_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<InlineImage>, AiError>;
}

#[derive(Debug, Clone)]
pub struct GeminiImageClient {
    api_key: String,
    base_url: String,
    model: String,
    timeout: std::time::Duration,
}

impl GeminiImageClient {
    pub fn from_settings(settings: &GenerationSettings) -> Result<Self, ConfigError> {
        ConfigError::check(
            "Image generation",
            &[
                ("GEMINI_API_KEY", settings.api_key.as_str()),
                ("GEMINI_BASE_URL", settings.base_url.as_str()),
                ("GEMINI_IMAGE_MODEL", settings.model.as_str()),
            ],
        )?;
        Ok(Self {
            api_key: settings.api_key.trim().to_string(),
            base_url: settings.base_url.trim().trim_end_matches('/').to_string(),
            model: settings.model.trim().to_string(),
            timeout: settings.timeout,
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn redact(&self, text: &str) -> String {
        text.replace(&self.api_key, "[redacted]")
    }

    async fn stream_first_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<InlineImage>, AiError> {
        let payload = request.to_payload();
        let response = get_http_client()
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::upstream(status, &self.redact(&body)));
        }

        let mut scanner = SseImageScanner::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            if let Some(image) = scanner.push(&bytes) {
                return Ok(Some(image));
            }
        }
        Ok(scanner.finish())
    }
}

#[async_trait]
impl ImageGenerationBackend for GeminiImageClient {
    async fn generate_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<InlineImage>, AiError> {
        debug!(
            target: "llm.gemini",
            model = self.model.as_str(),
            operation = request.operation.as_str(),
            images = request.images.len(),
            prompt = %truncate_for_log(&request.prompt, 200),
            "streaming image generation"
        );
        log_ai_timing(
            "gemini",
            &self.model,
            &request.operation,
            Some(json!({ "images": request.images.len() })),
            || self.stream_first_image(request),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Text {
        #[allow(dead_code)]
        text: String,
    },
    Other(#[allow(dead_code)] Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

fn first_inline_image(response: GeminiResponse) -> Option<InlineImage> {
    response
        .candidates?
        .into_iter()
        .next()?
        .content?
        .parts?
        .into_iter()
        .find_map(|part| match part {
            GeminiPart::InlineData { inline_data } => {
                match (inline_data.mime_type, inline_data.data) {
                    (Some(mime_type), Some(data)) if !mime_type.is_empty() && !data.is_empty() => {
                        Some(InlineImage { mime_type, data })
                    }
                    _ => None,
                }
            }
            _ => None,
        })
}

/// Splits an SSE byte stream into `data:` events and stops at the first inline image.
#[derive(Debug, Default)]
struct SseImageScanner {
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
}

impl SseImageScanner {
    fn push(&mut self, bytes: &[u8]) -> Option<InlineImage> {
        self.buffer.extend_from_slice(bytes);
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let pos = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.scanned = 0;
            if let Some(image) = parse_event_line(&line) {
                return Some(image);
            }
        }
        self.scanned = self.buffer.len();
        None
    }

    fn finish(&mut self) -> Option<InlineImage> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_event_line(&rest)
    }
}

fn parse_event_line(line: &[u8]) -> Option<InlineImage> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<GeminiResponse>(data) {
        Ok(response) => first_inline_image(response),
        Err(err) => {
            warn!(
                "Skipping unreadable Gemini stream event: {} ({})",
                err,
                truncate_for_log(data, 200)
            );
            None
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{GenerationRequest, ImageGenerationBackend, InlineImage};
    use crate::llm::errors::AiError;

    /// Scripted outcomes keyed by the request's operation name.
    #[derive(Default)]
    pub struct ScriptedGenerator {
        scripts: Mutex<Vec<(String, VecDeque<Result<Option<InlineImage>, AiError>>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn script(self, operation: &str, outcomes: Vec<Result<Option<InlineImage>, AiError>>) -> Self {
            self.scripts
                .lock()
                .push((operation.to_string(), outcomes.into()));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn calls_for(&self, operation: &str) -> usize {
            self.calls.lock().iter().filter(|call| *call == operation).count()
        }
    }

    #[async_trait]
    impl ImageGenerationBackend for ScriptedGenerator {
        async fn generate_image(
            &self,
            request: &GenerationRequest,
        ) -> Result<Option<InlineImage>, AiError> {
            self.calls.lock().push(request.operation.clone());
            let mut scripts = self.scripts.lock();
            let outcome = scripts
                .iter_mut()
                .find(|(operation, _)| *operation == request.operation)
                .and_then(|(_, outcomes)| outcomes.pop_front());
            outcome.unwrap_or(Ok(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn event(body: &str) -> String {
        format!("data: {body}\r\n\r\n")
    }

    #[test]
    fn finds_image_split_across_chunks() {
        let text_event = event(r#"{"candidates":[{"content":{"parts":[{"text":"Here you go"}]}}]}"#);
        let image_event = event(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"iVBORw0"}}]}}]}"#,
        );
        let stream = format!("{text_event}{image_event}");
        let (first, second) = stream.as_bytes().split_at(text_event.len() + 20);

        let mut scanner = SseImageScanner::default();
        assert!(scanner.push(first).is_none());
        let image = scanner.push(second).expect("image event");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data_uri(), "data:image/png;base64,iVBORw0");
    }

    #[test]
    fn stream_without_image_yields_none() {
        let mut scanner = SseImageScanner::default();
        let body = event(r#"{"candidates":[{"content":{"parts":[{"text":"I cannot do that"}]}}]}"#);
        assert!(scanner.push(body.as_bytes()).is_none());
        assert!(scanner.push(b"data: not-json\n").is_none());
        assert!(scanner.finish().is_none());
    }

    #[test]
    fn long_event_fed_in_small_chunks_is_scanned_once() {
        let payload = "A".repeat(64 * 1024);
        let body = event(&format!(
            r#"{{"candidates":[{{"content":{{"parts":[{{"inlineData":{{"mimeType":"image/png","data":"{payload}"}}}}]}}}}]}}"#
        ));
        let bytes = body.as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 4);

        let mut scanner = SseImageScanner::default();
        for chunk in head.chunks(512) {
            assert!(scanner.push(chunk).is_none());
            assert_eq!(scanner.scanned, scanner.buffer.len());
        }
        let image = scanner.push(tail).expect("image event");
        assert_eq!(image.data.len(), payload.len());
        assert_eq!(scanner.scanned, 0);
    }

    #[test]
    fn trailing_event_without_newline_is_read_on_finish() {
        let mut scanner = SseImageScanner::default();
        let body = r#"data: {"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/jpeg","data":"abc"}}]}}]}"#;
        assert!(scanner.push(body.as_bytes()).is_none());
        assert_eq!(
            scanner.finish(),
            Some(InlineImage {
                mime_type: "image/jpeg".to_string(),
                data: "abc".to_string()
            })
        );
    }

    #[test]
    fn payload_puts_images_before_prompt() {
        let request = GenerationRequest {
            operation: "tryon_front".to_string(),
            images: vec![
                InlineImage {
                    mime_type: "image/jpeg".to_string(),
                    data: "avatar".to_string(),
                },
                InlineImage {
                    mime_type: "image/png".to_string(),
                    data: "shirt".to_string(),
                },
            ],
            prompt: "dress the person".to_string(),
        };
        let payload = request.to_payload();
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["data"], "avatar");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[2]["text"], "dress the person");
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn requires_api_key() {
        let settings = GenerationSettings {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            timeout: Duration::from_secs(120),
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(25),
            view_pacing: Duration::from_secs(8),
        };
        let err = GeminiImageClient::from_settings(&settings).unwrap_err();
        assert_eq!(err.missing, vec!["GEMINI_API_KEY"]);
    }
}
