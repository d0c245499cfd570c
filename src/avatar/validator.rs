use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::avatar::types::{PhotoScore, PhotoValidationResult, Verdict};
use crate::llm::vision::{resolve_image_reference, PhotoSource, VisionBackend, VisionRequest};
use crate::llm::AiError;

const MAX_LIST_ITEMS: usize = 6;
const DEFAULT_CONFIDENCE: f64 = 0.5;

const SYSTEM_PROMPT: &str = "You review photos to decide whether they are reasonably usable for building a personal avatar. \
Be flexible and realistic: accept any photo where the person is sufficiently visible, even if it is not perfect or fully frontal.

Only reject an image when:
- the person cannot be made out,
- there are several people,
- mirrors confuse the reading of the body,
- the quality is extremely low,
- the face or the body is almost completely hidden.

If the image lets you recognise the person and understand their general shape, it must be considered suitable. \
Do not demand studio-quality photography or strict framing.";

const USER_PROMPT: &str = "Evaluate whether this image is reasonably useful to build an avatar, even if it is not perfect. \
Accept photos where the face or the body is visible enough, even with small crops, half-body shots or non-professional lighting. \
Return scores from 0 to 100 for illumination, sharpness, posture and framing. \
If you decide to reject, give concrete and simple reasons plus tips to take a better photo, but do not reject for minor details or overly high expectations.";

fn validation_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "verdict": { "type": "string", "enum": ["approved", "rejected"] },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "reasons": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 0,
                "maxItems": MAX_LIST_ITEMS,
            },
            "tips": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 0,
                "maxItems": MAX_LIST_ITEMS,
            },
            "photoScores": {
                "type": "array",
                "minItems": 0,
                "maxItems": 4,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "label": { "type": "string" },
                        "value": { "type": "number", "minimum": 0, "maximum": 100 },
                    },
                    "required": ["label", "value"],
                },
            },
        },
        "required": ["verdict", "confidence", "reasons", "tips", "photoScores"],
    })
}

/// Appends `- key: value` context lines under the base prompt.
pub(crate) fn prompt_with_context(base: &str, reply_language: &str, context: &[(&str, String)]) -> String {
    let mut prompt = format!("{base}\nWrite every human-readable text in {reply_language}.");
    if !context.is_empty() {
        prompt.push_str("\nAdditional context:");
        for (key, value) in context {
            prompt.push_str(&format!("\n- {key}: {value}"));
        }
    }
    prompt
}

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|value| value.is_finite())
}

/// Trimmed, non-empty strings, at most six.
pub(crate) fn sanitize_list(value: Option<&Value>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .take(MAX_LIST_ITEMS)
        .map(str::to_string)
        .collect()
}

fn normalize_scores(value: Option<&Value>, fallback_label: &str) -> Vec<PhotoScore> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let label = item
                .get("label")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .unwrap_or(fallback_label);
            let value = as_number(item.get("value")).unwrap_or(0.0);
            PhotoScore {
                label: label.to_string(),
                value: clamp(value, 0.0, 100.0).round(),
            }
        })
        .collect()
}

/// Anything other than an explicit `approved` is a rejection.
pub fn normalize_validation_reply(
    reply: &Value,
    fallback_label: &str,
) -> Result<PhotoValidationResult, AiError> {
    let Some(raw_verdict) = reply.get("verdict") else {
        return Err(AiError::MalformedReply(
            "validation reply has no verdict".to_string(),
        ));
    };
    let verdict = match raw_verdict.as_str().map(str::trim) {
        Some("approved") => Verdict::Approved,
        _ => Verdict::Rejected,
    };
    let confidence = clamp(
        as_number(reply.get("confidence")).unwrap_or(DEFAULT_CONFIDENCE),
        0.0,
        1.0,
    );
    let (reasons, tips) = match verdict {
        Verdict::Approved => (Vec::new(), Vec::new()),
        Verdict::Rejected => (
            sanitize_list(reply.get("reasons")),
            sanitize_list(reply.get("tips")),
        ),
    };

    Ok(PhotoValidationResult {
        verdict,
        confidence,
        reasons,
        tips,
        photo_scores: normalize_scores(reply.get("photoScores"), fallback_label),
    })
}

/// Asks the vision model whether a photo can be used as an avatar.
#[derive(Clone)]
pub struct PhotoValidator {
    backend: Arc<dyn VisionBackend>,
    reply_language: String,
}

impl PhotoValidator {
    pub fn new(backend: Arc<dyn VisionBackend>, reply_language: &str) -> Self {
        Self {
            backend,
            reply_language: reply_language.to_string(),
        }
    }

    fn fallback_label(&self) -> &'static str {
        if self.reply_language.to_lowercase().starts_with("span") {
            "Indicador"
        } else {
            "Indicator"
        }
    }

    /// A rejection is an `Ok` result; `Err` always means the check itself could not run.
    pub async fn validate(
        &self,
        photo: &PhotoSource,
        context: &[(&str, String)],
    ) -> Result<PhotoValidationResult, AiError> {
        let image_reference = resolve_image_reference(photo)?;
        let request = VisionRequest {
            operation: "photo_validation",
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: prompt_with_context(USER_PROMPT, &self.reply_language, context),
            image_reference,
            schema_name: "AvatarPhotoValidation",
            schema: validation_schema(),
        };

        let reply = self.backend.complete_json(request).await?;
        let result = normalize_validation_reply(&reply, self.fallback_label())?;
        info!(
            "Photo validation verdict={:?} confidence={:.2} reasons={} scores={}",
            result.verdict,
            result.confidence,
            result.reasons.len(),
            result.photo_scores.len()
        );
        Ok(result)
    }
}
