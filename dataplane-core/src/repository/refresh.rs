//! # Refresh-Token Repository
//!
//! Rotation is the one place in this layer that needs transactional
//! read-then-write: the service locks the family row, inspects it, and
//! writes the replacement inside a single `Transaction`, so the family
//! methods here take `&mut Transaction<'_, Postgres>` rather than a pool.

use chrono::{DateTime, Utc};
use shared::errors::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::refresh::RefreshToken;

#[derive(Debug, Clone)]
pub struct RefreshRepository {
    pool: PgPool,
}

impl RefreshRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_family(
        &self,
        namespace: &str,
        user_id: Uuid,
        session_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<RefreshToken> {
        let family_id = Uuid::new_v4();
        sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens
                (namespace, user_id, session_id, token_hash, family_id, generation, expires_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(session_id)
        .bind(token_hash)
        .bind(family_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_by_hash(&self, namespace: &str, token_hash: &str) -> CoreResult<Option<RefreshToken>> {
        sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE namespace = $1 AND token_hash = $2")
            .bind(namespace)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::Database)
    }

    /// Locks the row for update inside `tx`. Must be called before
    /// inspecting `is_current`/`is_rotatable` in `rotate`.
    pub async fn lock_by_hash(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        token_hash: &str,
    ) -> CoreResult<Option<RefreshToken>> {
        sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE namespace = $1 AND token_hash = $2 FOR UPDATE",
        )
        .bind(namespace)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn insert_next_generation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        session_id: Uuid,
        family_id: Uuid,
        generation: i32,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<RefreshToken> {
        sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens
                (namespace, user_id, session_id, token_hash, family_id, generation, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(session_id)
        .bind(token_hash)
        .bind(family_id)
        .bind(generation)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn mark_replaced(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        token_id: Uuid,
        replaced_by: Uuid,
    ) -> CoreResult<()> {
        sqlx::query("UPDATE refresh_tokens SET replaced_by = $1 WHERE namespace = $2 AND id = $3")
            .bind(replaced_by)
            .bind(namespace)
            .bind(token_id)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    /// Revokes every token in a family. Called on reuse detection.
    pub async fn revoke_family(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        family_id: Uuid,
    ) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE namespace = $1 AND family_id = $2 AND revoked_at IS NULL",
        )
        .bind(namespace)
        .bind(family_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn revoke_session_family(&self, namespace: &str, session_id: Uuid) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE namespace = $1 AND session_id = $2 AND revoked_at IS NULL",
        )
        .bind(namespace)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }
}
