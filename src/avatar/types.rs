use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One palette color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swatch {
    pub name: String,
    pub hex: String,
}

impl Swatch {
    pub fn new(name: &str, hex: &str) -> Self {
        Self {
            name: name.to_string(),
            hex: hex.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoScore {
    pub label: String,
    pub value: f64,
}

impl PhotoScore {
    pub fn new(label: &str, value: f64) -> Self {
        Self {
            label: label.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorProfile {
    pub season: Option<String>,
    pub skin_tone: Option<String>,
    pub undertone: Option<String>,
}

/// The single stored avatar of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarRecord {
    pub user_id: i64,
    pub image_reference: Option<String>,
    pub photo_quality_scores: Vec<PhotoScore>,
    pub created_at: DateTime<Utc>,
    pub color_profile: ColorProfile,
    pub recommended_colors: Vec<Swatch>,
    pub avoid_colors: Vec<Swatch>,
}

/// Complete set of values written by one upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarPayload {
    pub image_reference: Option<String>,
    pub photo_scores: Vec<PhotoScore>,
    pub color_profile: ColorProfile,
    pub recommended_colors: Vec<Swatch>,
    pub avoid_colors: Vec<Swatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoValidationResult {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub tips: Vec<String>,
    pub photo_scores: Vec<PhotoScore>,
}

impl PhotoValidationResult {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorimetryResult {
    pub season: Option<String>,
    pub skin_tone: Option<String>,
    pub undertone: Option<String>,
    pub recommended_colors: Vec<Swatch>,
    pub avoid_colors: Vec<Swatch>,
}
