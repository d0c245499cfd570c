use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::avatar::types::{PhotoScore, Swatch};

pub const MAX_STORED_SWATCHES: usize = 8;
pub const OVER_BUDGET_SWATCHES: usize = 5;
/// Width of the palette columns in the storefront schema.
pub const PALETTE_BYTE_BUDGET: usize = 255;

#[derive(Debug, Serialize, Deserialize)]
struct CompactSwatch {
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    h: Option<String>,
}

/// `[{n, h}]` JSON of at most eight swatches, five when that still exceeds the budget.
pub fn compact_palette(swatches: &[Swatch]) -> Result<Option<String>, serde_json::Error> {
    if swatches.is_empty() {
        return Ok(None);
    }
    let compact: Vec<CompactSwatch> = swatches
        .iter()
        .take(MAX_STORED_SWATCHES)
        .map(|swatch| CompactSwatch {
            n: Some(swatch.name.clone()),
            h: Some(swatch.hex.clone()),
        })
        .collect();

    let json = serde_json::to_string(&compact)?;
    if json.len() <= PALETTE_BYTE_BUDGET {
        return Ok(Some(json));
    }
    let truncated = &compact[..compact.len().min(OVER_BUDGET_SWATCHES)];
    Ok(Some(serde_json::to_string(truncated)?))
}

pub fn expand_palette(stored: Option<&str>) -> Vec<Swatch> {
    let Some(stored) = stored.filter(|value| !value.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<CompactSwatch>>(stored) {
        Ok(entries) => entries
            .into_iter()
            .filter_map(|entry| {
                let name = entry.n.filter(|name| !name.is_empty())?;
                Some(Swatch {
                    name,
                    hex: entry.h.unwrap_or_default(),
                })
            })
            .collect(),
        Err(err) => {
            warn!("Failed to parse stored color palette: {}", err);
            Vec::new()
        }
    }
}

/// `None` marks "never scored"; an empty list is never written.
pub fn encode_photo_scores(scores: &[PhotoScore]) -> Result<Option<String>, serde_json::Error> {
    if scores.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(scores).map(Some)
}

pub fn decode_photo_scores(stored: Option<&str>) -> Vec<PhotoScore> {
    let Some(stored) = stored.filter(|value| !value.trim().is_empty()) else {
        return Vec::new();
    };
    serde_json::from_str(stored).unwrap_or_else(|err| {
        warn!("Failed to parse stored photo scores: {}", err);
        Vec::new()
    })
}

/// Accepts `{name, hex}` and shorthand `{n, h}` entries; entries without a name are dropped.
pub fn normalize_client_colors(raw: &Value) -> Vec<Swatch> {
    let Some(entries) = raw.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let name = object
                .get("name")
                .or_else(|| object.get("n"))
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())?;
            let hex = object
                .get("hex")
                .or_else(|| object.get("h"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(Swatch::new(name, hex))
        })
        .collect()
}

/// Keeps entries with a label and a finite numeric value.
pub fn normalize_client_scores(raw: &Value) -> Vec<PhotoScore> {
    let Some(entries) = raw.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let label = match object.get("label")? {
                Value::String(label) => label.clone(),
                Value::Number(number) => number.to_string(),
                _ => return None,
            };
            if label.is_empty() {
                return None;
            }
            let value = match object.get("value")? {
                Value::Number(number) => number.as_f64()?,
                Value::String(text) => text.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            value.is_finite().then(|| PhotoScore { label, value })
        })
        .collect()
}
