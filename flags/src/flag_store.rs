use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// Errors for operations against the override store.
/// Wraps sqlx errors to carry the failing command as context.
#[derive(Error, Debug)]
pub enum FlagStoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: String,
        error: sqlx::Error,
    },
}

/// A persisted override row. Absence of a row means "defer to the
/// computed decision"; `override_value` itself can be `false`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct FlagOverrideRow {
    pub flag_key: String,
    pub override_value: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub type FlagStoreResult<T> = Result<T, FlagStoreError>;

/// Durable override state, shared by all server instances.
#[async_trait]
pub trait FlagStore {
    async fn get_flag(&self, key: &str) -> FlagStoreResult<Option<FlagOverrideRow>>;

    /// Upsert: single atomic statement, no read-then-write race.
    async fn set_flag(&self, key: &str, override_value: bool) -> FlagStoreResult<()>;

    /// Removes the override row entirely, distinct from setting a value.
    async fn delete_flag(&self, key: &str) -> FlagStoreResult<()>;

    /// Full scan, ordered by creation time.
    async fn get_all_flags(&self) -> FlagStoreResult<Vec<FlagOverrideRow>>;
}

pub struct PostgresFlagStore {
    pool: PgPool,
}

impl PostgresFlagStore {
    pub async fn new(url: &str, max_connections: u32) -> FlagStoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| FlagStoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlagStore for PostgresFlagStore {
    async fn get_flag(&self, key: &str) -> FlagStoreResult<Option<FlagOverrideRow>> {
        sqlx::query_as(
            "SELECT flag_key, override_value, description, created_at
             FROM flag_override WHERE flag_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| FlagStoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    async fn set_flag(&self, key: &str, override_value: bool) -> FlagStoreResult<()> {
        sqlx::query(
            "INSERT INTO flag_override (flag_key, override_value)
             VALUES ($1, $2)
             ON CONFLICT (flag_key)
             DO UPDATE SET override_value = EXCLUDED.override_value",
        )
        .bind(key)
        .bind(override_value)
        .execute(&self.pool)
        .await
        .map_err(|error| FlagStoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn delete_flag(&self, key: &str) -> FlagStoreResult<()> {
        sqlx::query("DELETE FROM flag_override WHERE flag_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|error| FlagStoreError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn get_all_flags(&self) -> FlagStoreResult<Vec<FlagOverrideRow>> {
        sqlx::query_as(
            "SELECT flag_key, override_value, description, created_at
             FROM flag_override ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| FlagStoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }
}

/// In-memory store for tests, paired with the real implementation the same
/// way MockRedisClient pairs with RedisClient.
#[derive(Default)]
pub struct MemoryFlagStore {
    rows: Mutex<Vec<FlagOverrideRow>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().expect("rows lock poisoned").len()
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn get_flag(&self, key: &str) -> FlagStoreResult<Option<FlagOverrideRow>> {
        let rows = self.rows.lock().expect("rows lock poisoned");
        Ok(rows.iter().find(|row| row.flag_key == key).cloned())
    }

    async fn set_flag(&self, key: &str, override_value: bool) -> FlagStoreResult<()> {
        let mut rows = self.rows.lock().expect("rows lock poisoned");
        match rows.iter_mut().find(|row| row.flag_key == key) {
            Some(row) => row.override_value = override_value,
            None => rows.push(FlagOverrideRow {
                flag_key: key.to_string(),
                override_value,
                description: None,
                created_at: Utc::now(),
            }),
        }
        Ok(())
    }

    async fn delete_flag(&self, key: &str) -> FlagStoreResult<()> {
        let mut rows = self.rows.lock().expect("rows lock poisoned");
        rows.retain(|row| row.flag_key != key);
        Ok(())
    }

    async fn get_all_flags(&self) -> FlagStoreResult<Vec<FlagOverrideRow>> {
        Ok(self.rows.lock().expect("rows lock poisoned").clone())
    }
}

/// Test double that fails every operation, for exercising the degraded
/// read path.
pub struct UnavailableFlagStore;

#[async_trait]
impl FlagStore for UnavailableFlagStore {
    async fn get_flag(&self, _key: &str) -> FlagStoreResult<Option<FlagOverrideRow>> {
        Err(FlagStoreError::QueryError {
            command: "SELECT".to_owned(),
            error: sqlx::Error::PoolClosed,
        })
    }

    async fn set_flag(&self, _key: &str, _override_value: bool) -> FlagStoreResult<()> {
        Err(FlagStoreError::QueryError {
            command: "INSERT".to_owned(),
            error: sqlx::Error::PoolClosed,
        })
    }

    async fn delete_flag(&self, _key: &str) -> FlagStoreResult<()> {
        Err(FlagStoreError::QueryError {
            command: "DELETE".to_owned(),
            error: sqlx::Error::PoolClosed,
        })
    }

    async fn get_all_flags(&self) -> FlagStoreResult<Vec<FlagOverrideRow>> {
        Err(FlagStoreError::QueryError {
            command: "SELECT".to_owned(),
            error: sqlx::Error::PoolClosed,
        })
    }
}
