//! Local fast-cache store.
//!
//! The [`LocalStore`] trait is a string key-value store with enumeration.
//! It holds mirrored records (`prediction_<id>`), the hot cache and the
//! persisted indices. Two backends are provided:
//!
//! - [`SqliteLocalStore`]: one `kv` table in a SQLite file, survives across
//!   invocations.
//! - [`InMemoryLocalStore`]: process-local, for tests and throwaway runs.
//!
//! Keys enumerate in insertion order in both backends.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{Category, Language};

pub const PREDICTION_PREFIX: &str = "prediction_";
pub const HOT_CACHE_KEY: &str = "cache_hot";
pub const GLOBAL_INDEX_KEY: &str = "index_global";

pub fn prediction_key(id: &str) -> String {
    format!("{}{}", PREDICTION_PREFIX, id)
}

pub fn cluster_index_key(language: Language, category: Category) -> String {
    format!("index_{}_{}", language, category)
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for key in self.keys().await? {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(value) = self.get(&key).await? {
                out.push((key, value));
            }
        }
        Ok(out)
    }
}

/// SQLite-backed [`LocalStore`].
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    /// Wrap a pool whose schema has been created by
    /// [`run_migrations`](crate::migrate::run_migrations).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("key")).collect())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY rowid ASC",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }
}

#[derive(Default)]
struct Entries {
    values: HashMap<String, String>,
    order: Vec<String>,
}

/// In-memory [`LocalStore`] for tests and ephemeral use.
#[derive(Default)]
pub struct InMemoryLocalStore {
    entries: RwLock<Entries>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if entries
            .values
            .insert(key.to_string(), value.to_string())
            .is_none()
        {
            entries.order.push(key.to_string());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if entries.values.remove(key).is_some() {
            entries.order.retain(|k| k != key);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.order.clone())
    }
}
