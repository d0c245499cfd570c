use std::time::Duration;

use crate::db::models::{AvatarRow, AvatarUpsert, ProductImageRow, TryOnResultInsert};
use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        // Every connection to `sqlite::memory:` opens its own empty database.
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_avatars (\
                user_id INTEGER PRIMARY KEY,\
                image_url TEXT,\
                photo_scores_json TEXT,\
                created_at TEXT NOT NULL,\
                season TEXT,\
                skin_tone TEXT,\
                undertone TEXT,\
                recommended_colors_json TEXT,\
                avoid_colors_json TEXT\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS product_variants (\
                id INTEGER PRIMARY KEY,\
                product_name TEXT NOT NULL,\
                image_url TEXT\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS try_on_results (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                user_id INTEGER,\
                product_variant_id INTEGER,\
                result_url TEXT NOT NULL,\
                saved_as TEXT,\
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP\
            );",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_try_on_results_user_id ON try_on_results(user_id);",
        )
        .execute(&pool)
        .await?;

        info!("Database ready at {}", database_url);
        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> sqlx::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn fetch_avatar(&self, user_id: i64) -> sqlx::Result<Option<AvatarRow>> {
        sqlx::query_as::<_, AvatarRow>(
            "SELECT user_id, image_url, photo_scores_json, created_at, season, skin_tone, undertone, \
             recommended_colors_json, avoid_colors_json \
             FROM user_avatars WHERE user_id = ? LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Insert or overwrite every column of the user's row, timestamp included.
    pub async fn upsert_avatar(&self, avatar: &AvatarUpsert) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO user_avatars (user_id, image_url, photo_scores_json, created_at, season, skin_tone, \
             undertone, recommended_colors_json, avoid_colors_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
             image_url = excluded.image_url, \
             photo_scores_json = excluded.photo_scores_json, \
             created_at = excluded.created_at, \
             season = excluded.season, \
             skin_tone = excluded.skin_tone, \
             undertone = excluded.undertone, \
             recommended_colors_json = excluded.recommended_colors_json, \
             avoid_colors_json = excluded.avoid_colors_json",
        )
        .bind(avatar.user_id)
        .bind(&avatar.image_url)
        .bind(&avatar.photo_scores_json)
        .bind(avatar.created_at)
        .bind(&avatar.season)
        .bind(&avatar.skin_tone)
        .bind(&avatar.undertone)
        .bind(&avatar.recommended_colors_json)
        .bind(&avatar.avoid_colors_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a row existed.
    pub async fn delete_avatar(&self, user_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM user_avatars WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_product_image(
        &self,
        product_variant_id: i64,
    ) -> sqlx::Result<Option<ProductImageRow>> {
        sqlx::query_as::<_, ProductImageRow>(
            "SELECT id, product_name, image_url FROM product_variants WHERE id = ? LIMIT 1",
        )
        .bind(product_variant_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn insert_try_on_result(&self, insert: &TryOnResultInsert) -> sqlx::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO try_on_results (user_id, product_variant_id, result_url, saved_as) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(insert.user_id)
        .bind(insert.product_variant_id)
        .bind(&insert.result_url)
        .bind(&insert.saved_as)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
