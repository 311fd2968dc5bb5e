//! services/mediqr/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `KeyValueStore` port from the `core` crate. Every collection and slot is
//! one row of the `kv_store` table in a SQLite database, accessed with `sqlx`.

use async_trait::async_trait;
use bytes::Bytes;
use mediqr_core::ports::{KeyValueStore, PortError, PortResult};
use sqlx::{FromRow, SqlitePool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `KeyValueStore` port.
#[derive(Clone)]
pub struct SqliteKvAdapter {
    pool: SqlitePool,
}

impl SqliteKvAdapter {
    /// Creates a new `SqliteKvAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct KvRecord {
    value: Vec<u8>,
}

impl KvRecord {
    fn to_bytes(self) -> Bytes {
        Bytes::from(self.value)
    }
}

//=========================================================================================
// `KeyValueStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl KeyValueStore for SqliteKvAdapter {
    async fn get(&self, key: &str) -> PortResult<Option<Bytes>> {
        let record = sqlx::query_as::<_, KvRecord>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;
        Ok(record.map(KvRecord::to_bytes))
    }

    async fn set(&self, key: &str, value: Bytes) -> PortResult<()> {
        // A single upsert, so an overwrite is never observed half-written.
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT (key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value.to_vec())
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn adapter() -> SqliteKvAdapter {
        // One connection: every new in-memory connection would be a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let adapter = SqliteKvAdapter::new(pool);
        adapter.run_migrations().await.expect("migrations");
        adapter
    }

    #[tokio::test]
    async fn missing_key_reads_none() {
        let db = adapter().await;
        assert!(db.get("mediqr_users").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let db = adapter().await;
        db.set("mediqr_users", Bytes::from_static(b"[1]")).await.unwrap();
        db.set("mediqr_users", Bytes::from_static(b"[1,2]")).await.unwrap();
        assert_eq!(
            db.get("mediqr_users").await.unwrap(),
            Some(Bytes::from_static(b"[1,2]"))
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let db = adapter().await;
        db.set("mediqr_session", Bytes::from_static(b"{}")).await.unwrap();
        db.remove("mediqr_session").await.unwrap();
        db.remove("mediqr_session").await.unwrap();
        assert!(db.get("mediqr_session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let db = adapter().await;
        db.set("mediqr_users", Bytes::from_static(b"[]")).await.unwrap();
        db.set("mediqr_patients", Bytes::from_static(b"[{}]")).await.unwrap();
        db.remove("mediqr_users").await.unwrap();
        assert_eq!(
            db.get("mediqr_patients").await.unwrap(),
            Some(Bytes::from_static(b"[{}]"))
        );
    }
}
