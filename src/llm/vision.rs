use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ConfigError, VisionSettings};
use crate::llm::errors::AiError;
use crate::utils::http::get_http_client;
use crate::utils::media::strip_mime_parameters;
use crate::utils::timing::log_ai_timing;

const DEFAULT_UPLOAD_MIME: &str = "image/jpeg";

/// An uploaded photo held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl PhotoUpload {
    pub fn content_type(&self) -> String {
        self.mime_type
            .as_deref()
            .map(strip_mime_parameters)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_UPLOAD_MIME.to_string())
    }
}

/// Where the photo for a vision request comes from.
#[derive(Debug, Clone)]
pub enum PhotoSource {
    Url(String),
    Upload(PhotoUpload),
}

/// URLs pass through; uploads become a base64 data URI.
pub fn resolve_image_reference(source: &PhotoSource) -> Result<String, AiError> {
    match source {
        PhotoSource::Url(url) => {
            let url = url.trim();
            if url.is_empty() {
                return Err(AiError::InvalidImage("image URL is empty".to_string()));
            }
            Ok(url.to_string())
        }
        PhotoSource::Upload(upload) => {
            if upload.bytes.is_empty() {
                return Err(AiError::InvalidImage("uploaded file is empty".to_string()));
            }
            let encoded = general_purpose::STANDARD.encode(&upload.bytes);
            Ok(format!("data:{};base64,{}", upload.content_type(), encoded))
        }
    }
}

/// One structured-output request: prompts, an image and the JSON schema the reply must follow.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub operation: &'static str,
    pub system_prompt: String,
    pub user_prompt: String,
    pub image_reference: String,
    pub schema_name: &'static str,
    pub schema: Value,
}

impl VisionRequest {
    pub fn to_body(&self) -> Value {
        json!({
            "messages": [
                {
                    "role": "system",
                    "content": [{ "type": "text", "text": self.system_prompt }],
                },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.user_prompt },
                        { "type": "image_url", "image_url": { "url": self.image_reference } },
                    ],
                },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": self.schema_name, "schema": self.schema },
            },
        })
    }
}

#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Returns the JSON the model produced, or the raw envelope when it carried no text.
    async fn complete_json(&self, request: VisionRequest) -> Result<Value, AiError>;
}

/// Chat-completion deployment with image input and JSON-schema constrained replies.
#[derive(Debug, Clone)]
pub struct VisionClient {
    endpoint: String,
    api_key: String,
    deployment: String,
    timeout: std::time::Duration,
}

impl VisionClient {
    pub fn from_settings(settings: &VisionSettings) -> Result<Self, ConfigError> {
        ConfigError::check(
            "Vision model",
            &[
                ("VISION_ENDPOINT", settings.endpoint.as_str()),
                ("VISION_API_KEY", settings.api_key.as_str()),
                ("VISION_DEPLOYMENT", settings.deployment.as_str()),
                ("VISION_API_VERSION", settings.api_version.as_str()),
            ],
        )?;

        Ok(Self {
            endpoint: build_endpoint(settings),
            api_key: settings.api_key.trim().to_string(),
            deployment: settings.deployment.trim().to_string(),
            timeout: settings.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn build_endpoint(settings: &VisionSettings) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        settings.endpoint.trim().trim_end_matches('/'),
        settings.deployment.trim(),
        settings.api_version.trim()
    )
}

#[async_trait]
impl VisionBackend for VisionClient {
    async fn complete_json(&self, request: VisionRequest) -> Result<Value, AiError> {
        let body = request.to_body();
        debug!(
            target: "llm.vision",
            operation = request.operation,
            schema = request.schema_name,
            image_len = request.image_reference.len(),
            "sending vision request"
        );

        let envelope = log_ai_timing(
            "azure_openai",
            &self.deployment,
            request.operation,
            Some(json!({ "schema": request.schema_name })),
            || async {
                let response = get_http_client()
                    .post(&self.endpoint)
                    .header("api-key", &self.api_key)
                    .timeout(self.timeout)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(AiError::upstream(status, &text));
                }
                Ok::<Value, AiError>(response.json::<Value>().await?)
            },
        )
        .await?;

        extract_json_reply(envelope)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Chunks(Vec<ContentChunk>),
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct ContentChunk {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<ChunkText>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChunkText {
    Single(String),
    Pieces(Vec<String>),
}

fn message_text(envelope: &Value) -> Option<String> {
    let completion = ChatCompletion::deserialize(envelope).ok()?;
    let content = completion.choices.into_iter().next()?.message?.content?;
    match content {
        MessageContent::Text(text) => Some(text),
        MessageContent::Chunks(chunks) => {
            let chunk = chunks
                .into_iter()
                .find(|chunk| chunk.kind.as_deref() == Some("text"))?;
            match chunk.text? {
                ChunkText::Single(text) => Some(text),
                ChunkText::Pieces(pieces) => Some(pieces.concat()),
            }
        }
        MessageContent::Other(_) => None,
    }
}

/// Parses the first choice's text as JSON; an envelope without text is handed back unchanged.
pub fn extract_json_reply(envelope: Value) -> Result<Value, AiError> {
    if envelope.is_null() {
        return Err(AiError::MalformedReply("empty reply".to_string()));
    }
    match message_text(&envelope) {
        Some(text) => Ok(serde_json::from_str(text.trim())?),
        None => Ok(envelope),
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use serde_json::Value;

    use super::{VisionBackend, VisionRequest};
    use crate::llm::errors::AiError;

    /// Replays canned replies in order and keeps every request it saw.
    #[derive(Default)]
    pub struct ScriptedVision {
        replies: Mutex<VecDeque<Result<Value, AiError>>>,
        requests: Mutex<Vec<VisionRequest>>,
    }

    impl ScriptedVision {
        pub fn replying(replies: Vec<Result<Value, AiError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<VisionRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedVision {
        async fn complete_json(&self, request: VisionRequest) -> Result<Value, AiError> {
            self.requests.lock().push(request);
            self.replies.lock().pop_front().unwrap_or_else(|| {
                Err(AiError::upstream(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no scripted reply",
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn settings() -> VisionSettings {
        VisionSettings {
            endpoint: "https://vision.example.com/".to_string(),
            api_key: "secret".to_string(),
            deployment: "gpt-5-nano".to_string(),
            api_version: "2024-12-01-preview".to_string(),
            timeout: Duration::from_secs(60),
            reply_language: "Spanish".to_string(),
        }
    }

    #[test]
    fn missing_settings_fail_at_construction() {
        let mut incomplete = settings();
        incomplete.endpoint.clear();
        incomplete.api_key = "  ".to_string();

        let err = VisionClient::from_settings(&incomplete).unwrap_err();
        assert_eq!(err.missing, vec!["VISION_ENDPOINT", "VISION_API_KEY"]);
    }

    #[test]
    fn endpoint_targets_deployment_chat_completions() {
        let client = VisionClient::from_settings(&settings()).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://vision.example.com/openai/deployments/gpt-5-nano/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn uploads_become_data_uris_with_default_mime() {
        let upload = PhotoUpload {
            bytes: b"hello".to_vec(),
            mime_type: None,
            file_name: Some("me.jpg".to_string()),
        };
        let reference = resolve_image_reference(&PhotoSource::Upload(upload)).unwrap();
        assert_eq!(reference, "data:image/jpeg;base64,aGVsbG8=");

        let url = resolve_image_reference(&PhotoSource::Url("https://cdn.example/me.png".into()))
            .unwrap();
        assert_eq!(url, "https://cdn.example/me.png");
    }

    #[test]
    fn empty_upload_is_rejected() {
        let upload = PhotoUpload {
            bytes: Vec::new(),
            mime_type: Some("image/png".to_string()),
            file_name: None,
        };
        assert!(matches!(
            resolve_image_reference(&PhotoSource::Upload(upload)),
            Err(AiError::InvalidImage(_))
        ));
    }

    #[test]
    fn extracts_plain_string_content() {
        let envelope = json!({
            "choices": [{ "message": { "content": "{\"verdict\":\"approved\"}" } }]
        });
        assert_eq!(
            extract_json_reply(envelope).unwrap(),
            json!({ "verdict": "approved" })
        );
    }

    #[test]
    fn extracts_text_chunk_content() {
        let envelope = json!({
            "choices": [{ "message": { "content": [
                { "type": "refusal" },
                { "type": "text", "text": ["{\"a\":", "1}"] }
            ] } }]
        });
        assert_eq!(extract_json_reply(envelope).unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn envelope_without_text_is_returned_as_is() {
        let envelope = json!({ "choices": [{ "message": { "content": null } }], "id": "x" });
        assert_eq!(extract_json_reply(envelope.clone()).unwrap(), envelope);
    }

    #[test]
    fn non_json_text_is_a_decode_error() {
        let envelope = json!({ "choices": [{ "message": { "content": "sorry, no" } }] });
        assert!(matches!(
            extract_json_reply(envelope),
            Err(AiError::Decode(_))
        ));
    }

    #[test]
    fn request_body_carries_schema_constraint() {
        let request = VisionRequest {
            operation: "photo_validation",
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
            image_reference: "https://cdn.example/me.png".to_string(),
            schema_name: "AvatarPhotoValidation",
            schema: json!({ "type": "object" }),
        };
        let body = request.to_body();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            "AvatarPhotoValidation"
        );
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "https://cdn.example/me.png"
        );
    }
}
