use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stored avatar row; palettes and scores are serialized JSON columns.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AvatarRow {
    pub user_id: i64,
    pub image_url: Option<String>,
    pub photo_scores_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub season: Option<String>,
    pub skin_tone: Option<String>,
    pub undertone: Option<String>,
    pub recommended_colors_json: Option<String>,
    pub avoid_colors_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AvatarUpsert {
    pub user_id: i64,
    pub image_url: Option<String>,
    pub photo_scores_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub season: Option<String>,
    pub skin_tone: Option<String>,
    pub undertone: Option<String>,
    pub recommended_colors_json: Option<String>,
    pub avoid_colors_json: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductImageRow {
    pub id: i64,
    pub product_name: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TryOnResultInsert {
    pub user_id: Option<i64>,
    pub product_variant_id: Option<i64>,
    pub result_url: String,
    pub saved_as: Option<String>,
}
