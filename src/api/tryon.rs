use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::storage::StorageError;
use crate::state::AppState;

const DEFAULT_PRODUCT_NAME: &str = "garment";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnRequest {
    #[serde(default)]
    pub product_id: Option<i64>,
}

/// Renders the caller's avatar wearing a product. Partial results are a success.
pub async fn generate_try_on(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<TryOnRequest>,
) -> Result<Json<Value>, ApiError> {
    let generator = state.generator.as_ref().map_err(|err| err.clone())?;
    let product_id = request
        .product_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::bad_request("productId is required"))?;

    let avatar_url = state
        .avatars
        .get(user_id)
        .await?
        .and_then(|avatar| avatar.image_reference)
        .ok_or_else(|| {
            ApiError::bad_request("You have no saved avatar. Create your virtual avatar first.")
        })?;

    let product = state
        .db
        .find_product_image(product_id)
        .await
        .map_err(StorageError::from)?;
    let Some((product_url, product_name)) = product.and_then(|row| {
        let name = if row.product_name.trim().is_empty() {
            DEFAULT_PRODUCT_NAME.to_string()
        } else {
            row.product_name
        };
        row.image_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| (url, name))
    }) else {
        return Err(ApiError::bad_request("The product has no image available."));
    };

    let sleeper = state.sleeper.as_ref();
    let (avatar_image, product_image) = tokio::try_join!(
        state.fetcher.fetch(&avatar_url, sleeper),
        state.fetcher.fetch(&product_url, sleeper),
    )?;

    let views = generator
        .generate(&avatar_image, &product_image, &product_name)
        .await;
    if views.is_empty() {
        return Err(ApiError::Internal(
            "No images could be generated. Please try again.".to_string(),
        ));
    }

    info!(
        "Generated {}/{} try-on views for user {} and product {}",
        views.len(),
        generator.views().len(),
        user_id,
        product_id
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Generated {} virtual try-on views.", views.len()),
        "views": views,
    })))
}
