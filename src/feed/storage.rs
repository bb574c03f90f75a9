//! Storage abstraction for user preferences (watchlist and hidden sets).
//!
//! This module defines the contract for durable key-value preference storage and
//! its SQLite implementation. Each set is stored under a fixed key as an ordered
//! JSON list of pubkeys.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::types::Pubkey;

/// Storage key of the watchlist set.
pub const WATCHLIST_KEY: &str = "watchlist";
/// Storage key of the hidden set.
pub const HIDDEN_KEY: &str = "hiddenTokens";

/// Formal contract for durable preference storage.
#[async_trait]
pub trait PreferenceStorage: Send + Sync {
    /// Loads the members stored under `key`. A key never written yields an empty list.
    async fn load_set(&self, key: &str) -> Result<Vec<Pubkey>>;

    /// Replaces the members stored under `key`.
    async fn save_set(&self, key: &str, members: &[Pubkey]) -> Result<()>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(FromRow)]
struct PreferenceRow {
    value: String, // JSON list
}

/// SQLite implementation of the PreferenceStorage trait.
pub struct SqlitePreferences {
    pool: Pool<Sqlite>,
}

impl SqlitePreferences {
    /// Connect to (and create if needed) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to preference database {}", database_url))?;

        Self::create_schema(&pool).await?;
        info!("SqlitePreferences initialized and connected to {}", database_url);

        Ok(Arc::new(Self { pool }))
    }

    /// Private in-memory database. A single pinned connection keeps it alive.
    pub async fn in_memory() -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory preference database")?;

        Self::create_schema(&pool).await?;
        debug!("SqlitePreferences initialized in memory");

        Ok(Arc::new(Self { pool }))
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create preferences table")?;

        Ok(())
    }
}

#[async_trait]
impl PreferenceStorage for SqlitePreferences {
    #[instrument(skip(self))]
    async fn load_set(&self, key: &str) -> Result<Vec<Pubkey>> {
        let row: Option<PreferenceRow> =
            sqlx::query_as("SELECT value FROM preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to load preference {}", key))?;

        match row {
            Some(row) => serde_json::from_str(&row.value)
                .with_context(|| format!("Preference {} is not a list of pubkeys", key)),
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self, members), fields(count = members.len()))]
    async fn save_set(&self, key: &str, members: &[Pubkey]) -> Result<()> {
        let value = serde_json::to_string(members)?;

        sqlx::query(
            r#"
            INSERT INTO preferences (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save preference {}", key))?;

        debug!("Saved {} members under {}", members.len(), key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
