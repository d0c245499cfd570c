use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::avatar::types::{ColorimetryResult, Swatch};
use crate::avatar::validator::prompt_with_context;
use crate::llm::vision::{resolve_image_reference, PhotoSource, VisionBackend, VisionRequest};
use crate::llm::AiError;

static HEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid hex regex"));

const SYSTEM_PROMPT: &str = "You are a professional personal color analyst. You study full-body photos to identify \
the seasonal palette (spring, summer, autumn or winter), the skin tone, the undertone and the best clothing palette. \
Favour realistic combinations for both womenswear and menswear.";

const USER_PROMPT: &str = "Look at the overall hue of the skin, the contrast with hair and eyes, the lighting and the shadows. \
Return a classic season (Spring, Summer, Autumn or Winter), a skin tone (Light, Medium, Dark, ...), an undertone \
(Warm, Cool, Neutral) and between 3 and 8 recommended colors and 3 to 8 colors to avoid, each with a short name and a valid HEX code.";

const DEFAULT_SWATCH_NAME: &str = "Color";

pub fn fallback_recommended() -> Vec<Swatch> {
    vec![
        Swatch::new("Terracota", "#D96C4D"),
        Swatch::new("Oliva", "#7A8B4F"),
        Swatch::new("Mostaza", "#E2B13C"),
        Swatch::new("Caramelo", "#C08A5C"),
    ]
}

pub fn fallback_avoid() -> Vec<Swatch> {
    vec![
        Swatch::new("Negro puro", "#050505"),
        Swatch::new("Gris frío", "#8D99AE"),
        Swatch::new("Azul hielo", "#B7D0E8"),
    ]
}

fn swatch_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "name": { "type": "string" },
            "hex": { "type": "string" },
        },
        "required": ["name", "hex"],
    })
}

fn colorimetry_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "season": { "type": ["string", "null"] },
            "skinTone": { "type": ["string", "null"] },
            "undertone": { "type": ["string", "null"] },
            "recommendedColors": {
                "type": "array",
                "minItems": 3,
                "maxItems": 8,
                "items": swatch_schema(),
            },
            "avoidColors": {
                "type": "array",
                "minItems": 3,
                "maxItems": 8,
                "items": swatch_schema(),
            },
        },
        "required": ["season", "skinTone", "undertone", "recommendedColors", "avoidColors"],
    })
}

/// `#`-prefixed 3 or 6 digit hex, `None` for anything else.
pub fn normalize_hex(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let candidate = if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("#{trimmed}")
    };
    HEX_RE.is_match(&candidate).then_some(candidate)
}

fn clean_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Invalid hex entries are dropped; `None` when nothing usable is left.
fn normalize_model_colors(value: Option<&Value>) -> Option<Vec<Swatch>> {
    let items = value?.as_array()?;
    let swatches: Vec<Swatch> = items
        .iter()
        .filter_map(|item| {
            let hex = normalize_hex(item.get("hex").and_then(Value::as_str)?)?;
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_SWATCH_NAME);
            Some(Swatch::new(name, &hex))
        })
        .collect();
    (!swatches.is_empty()).then_some(swatches)
}

const EXPECTED_KEYS: [&str; 5] = [
    "season",
    "skinTone",
    "undertone",
    "recommendedColors",
    "avoidColors",
];

pub fn normalize_colorimetry_reply(reply: &Value) -> Option<ColorimetryResult> {
    let object = reply.as_object()?;
    if !EXPECTED_KEYS.iter().any(|key| object.contains_key(*key)) {
        return None;
    }
    Some(ColorimetryResult {
        season: clean_text(object.get("season")),
        skin_tone: clean_text(object.get("skinTone")),
        undertone: clean_text(object.get("undertone")),
        recommended_colors: normalize_model_colors(object.get("recommendedColors"))
            .unwrap_or_else(fallback_recommended),
        avoid_colors: normalize_model_colors(object.get("avoidColors"))
            .unwrap_or_else(fallback_avoid),
    })
}

/// Derives season, tones and palettes from a photo. Never fails: errors become `None`.
#[derive(Clone)]
pub struct ColorimetryAnalyzer {
    backend: Result<Arc<dyn VisionBackend>, crate::config::ConfigError>,
    reply_language: String,
}

impl ColorimetryAnalyzer {
    pub fn new(
        backend: Result<Arc<dyn VisionBackend>, crate::config::ConfigError>,
        reply_language: &str,
    ) -> Self {
        Self {
            backend,
            reply_language: reply_language.to_string(),
        }
    }

    pub async fn analyze(
        &self,
        photo: &PhotoSource,
        context: &[(&str, String)],
    ) -> Option<ColorimetryResult> {
        match self.try_analyze(photo, context).await {
            Ok(Some(result)) => {
                info!(
                    "Colorimetry season={:?} recommended={} avoid={}",
                    result.season,
                    result.recommended_colors.len(),
                    result.avoid_colors.len()
                );
                Some(result)
            }
            Ok(None) => {
                warn!("Colorimetry reply carried none of the expected fields");
                None
            }
            Err(err) => {
                warn!("Colorimetry analysis failed: {}", err);
                None
            }
        }
    }

    async fn try_analyze(
        &self,
        photo: &PhotoSource,
        context: &[(&str, String)],
    ) -> Result<Option<ColorimetryResult>, AiError> {
        let backend = self.backend.clone()?;
        let request = VisionRequest {
            operation: "colorimetry",
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: prompt_with_context(USER_PROMPT, &self.reply_language, context),
            image_reference: resolve_image_reference(photo)?,
            schema_name: "AvatarColorimetry",
            schema: colorimetry_schema(),
        };
        let reply = backend.complete_json(request).await?;
        Ok(normalize_colorimetry_reply(&reply))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::config::ConfigError;
    use crate::llm::vision::testing::ScriptedVision;
    use crate::llm::vision::PhotoUpload;

    fn upload() -> PhotoSource {
        PhotoSource::Upload(PhotoUpload {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: Some("image/jpeg".to_string()),
            file_name: Some("me.jpg".to_string()),
        })
    }

    #[test]
    fn hex_values_are_prefixed_and_validated() {
        assert_eq!(normalize_hex("d96c4d").as_deref(), Some("#d96c4d"));
        assert_eq!(normalize_hex(" #FFF ").as_deref(), Some("#FFF"));
        assert_eq!(normalize_hex("red"), None);
        assert_eq!(normalize_hex("12345"), None);
        assert_eq!(normalize_hex("#1234567"), None);
    }

    #[test]
    fn invalid_entries_are_dropped_and_empty_lists_fall_back() {
        let reply = json!({
            "season": " Otoño ",
            "skinTone": "",
            "undertone": null,
            "recommendedColors": [
                { "name": "Oliva", "hex": "7E8F41" },
                { "name": "Rojo", "hex": "red" },
                { "name": " ", "hex": "#abc" },
            ],
            "avoidColors": [{ "name": "Neón", "hex": "12345" }],
        });
        let result = normalize_colorimetry_reply(&reply).unwrap();
        assert_eq!(result.season.as_deref(), Some("Otoño"));
        assert_eq!(result.skin_tone, None);
        assert_eq!(result.undertone, None);
        assert_eq!(
            result.recommended_colors,
            vec![Swatch::new("Oliva", "#7E8F41"), Swatch::new("Color", "#abc")]
        );
        assert_eq!(result.avoid_colors, fallback_avoid());
        for swatch in result.recommended_colors.iter().chain(&result.avoid_colors) {
            assert!(HEX_RE.is_match(&swatch.hex));
        }
    }

    #[test]
    fn raw_envelope_is_not_a_result() {
        assert!(normalize_colorimetry_reply(&json!({ "choices": [] })).is_none());
        assert!(normalize_colorimetry_reply(&json!("text")).is_none());
    }

    #[tokio::test]
    async fn upstream_error_resolves_to_none() {
        let backend: Arc<dyn VisionBackend> = Arc::new(ScriptedVision::replying(vec![Err(
            AiError::upstream(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        )]));
        let analyzer = ColorimetryAnalyzer::new(Ok(backend), "Spanish");
        assert!(analyzer.analyze(&upload(), &[]).await.is_none());
    }

    #[tokio::test]
    async fn missing_configuration_resolves_to_none() {
        let analyzer = ColorimetryAnalyzer::new(
            Err(ConfigError {
                component: "Vision model",
                missing: vec!["VISION_API_KEY"],
            }),
            "Spanish",
        );
        assert!(analyzer.analyze(&upload(), &[]).await.is_none());
    }

    #[tokio::test]
    async fn successful_reply_is_normalized() {
        let backend = Arc::new(ScriptedVision::replying(vec![Ok(json!({
            "season": "Invierno",
            "skinTone": "Claro",
            "undertone": "Frío",
            "recommendedColors": [
                { "name": "Azul rey", "hex": "#1F4E9C" },
                { "name": "Fucsia", "hex": "#C2185B" },
                { "name": "Blanco", "hex": "#FFFFFF" },
            ],
            "avoidColors": [
                { "name": "Naranja", "hex": "#F57C00" },
                { "name": "Beige", "hex": "#D8C3A5" },
                { "name": "Mostaza", "hex": "#D9A441" },
            ],
        }))]));
        let shared: Arc<dyn VisionBackend> = backend.clone();
        let analyzer = ColorimetryAnalyzer::new(Ok(shared), "Spanish");
        let result = analyzer.analyze(&upload(), &[]).await.unwrap();
        assert_eq!(result.season.as_deref(), Some("Invierno"));
        assert_eq!(result.recommended_colors.len(), 3);
        assert_eq!(result.avoid_colors[0], Swatch::new("Naranja", "#F57C00"));
        let requests = backend.requests();
        assert!(requests[0].image_reference.starts_with("data:image/jpeg;base64,"));
    }
}
