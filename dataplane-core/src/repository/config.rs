//! # Config Store Repository
//!
//! Monotonic versioning lives in `version_counters`, one row per
//! `(namespace, key)`, so that version numbers survive deletes and are never
//! reused. `set`/`activate`/`rollback` all bump or reuse that counter inside
//! the caller's transaction.

use serde_json::Value as Json;
use shared::errors::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::config_entry::{ConfigEntry, ConfigSchema};

#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: PgPool,
}

impl ConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bumps and returns the next version number for `(namespace, key)`.
    pub async fn next_version(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, key: &str) -> CoreResult<i32> {
        let row: (i32,) = sqlx::query_as(
            r#"
            INSERT INTO version_counters (namespace, key, next_version)
            VALUES ($1, $2, 2)
            ON CONFLICT (namespace, key) DO UPDATE SET next_version = version_counters.next_version + 1
            RETURNING next_version - 1
            "#,
        )
        .bind(namespace)
        .bind(key)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)?;
        Ok(row.0)
    }

    pub async fn insert_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        key: &str,
        version: i32,
        value: &Json,
        is_active: bool,
        created_by: Option<&str>,
    ) -> CoreResult<ConfigEntry> {
        sqlx::query_as::<_, ConfigEntry>(
            r#"
            INSERT INTO config_entries (namespace, key, version, value, is_active, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(version)
        .bind(value)
        .bind(is_active)
        .bind(created_by)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    /// Deactivates whatever entry is currently active for `(namespace, key)`.
    pub async fn deactivate_current(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, key: &str) -> CoreResult<()> {
        sqlx::query("UPDATE config_entries SET is_active = false WHERE namespace = $1 AND key = $2 AND is_active = true")
            .bind(namespace)
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn activate_version(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, key: &str, version: i32) -> CoreResult<()> {
        let result = sqlx::query("UPDATE config_entries SET is_active = true WHERE namespace = $1 AND key = $2 AND version = $3")
            .bind(namespace)
            .bind(key)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("config entry version"));
        }
        Ok(())
    }

    pub async fn find_active(&self, namespace: &str, key: &str) -> CoreResult<Option<ConfigEntry>> {
        sqlx::query_as::<_, ConfigEntry>(
            "SELECT * FROM config_entries WHERE namespace = $1 AND key = $2 AND is_active = true",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_version(&self, namespace: &str, key: &str, version: i32) -> CoreResult<Option<ConfigEntry>> {
        sqlx::query_as::<_, ConfigEntry>(
            "SELECT * FROM config_entries WHERE namespace = $1 AND key = $2 AND version = $3",
        )
        .bind(namespace)
        .bind(key)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn list_versions(&self, namespace: &str, key: &str) -> CoreResult<Vec<ConfigEntry>> {
        sqlx::query_as::<_, ConfigEntry>(
            "SELECT * FROM config_entries WHERE namespace = $1 AND key = $2 ORDER BY version DESC",
        )
        .bind(namespace)
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn list_active_by_prefix(&self, namespace: &str, prefix: &str) -> CoreResult<Vec<ConfigEntry>> {
        sqlx::query_as::<_, ConfigEntry>(
            "SELECT * FROM config_entries WHERE namespace = $1 AND key LIKE $2 AND is_active = true ORDER BY key",
        )
        .bind(namespace)
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    // -- schemas --------------------------------------------------------------

    pub async fn upsert_schema(&self, namespace: &str, key_pattern: &str, schema: &Json, description: Option<&str>) -> CoreResult<ConfigSchema> {
        sqlx::query_as::<_, ConfigSchema>(
            r#"
            INSERT INTO config_schemas (namespace, key_pattern, schema, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace, key_pattern)
            DO UPDATE SET schema = EXCLUDED.schema, description = EXCLUDED.description, updated_at = now()
            RETURNING key_pattern, schema, description, created_at, updated_at
            "#,
        )
        .bind(namespace)
        .bind(key_pattern)
        .bind(schema)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Returns every schema whose `key_pattern` is a prefix of `key`, longest
    /// match last so the caller can pick `.last()`.
    pub async fn matching_schemas(&self, namespace: &str, key: &str) -> CoreResult<Vec<ConfigSchema>> {
        sqlx::query_as::<_, ConfigSchema>(
            r#"
            SELECT key_pattern, schema, description, created_at, updated_at
            FROM config_schemas
            WHERE namespace = $1 AND ($2 LIKE key_pattern || '%' OR key_pattern = $2)
            ORDER BY length(key_pattern) ASC
            "#,
        )
        .bind(namespace)
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }
}
