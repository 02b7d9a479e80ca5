//! # Impersonation Repository

use chrono::{DateTime, Utc};
use shared::errors::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::impersonation::{ImpersonationSession, OperatorImpersonationSession};

#[derive(Debug, Clone)]
pub struct ImpersonationRepository {
    pool: PgPool,
}

impl ImpersonationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn start(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        actor_id: Uuid,
        target_user_id: Uuid,
        original_session_id: Uuid,
        impersonation_session_id: Uuid,
        reason: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<ImpersonationSession> {
        sqlx::query_as::<_, ImpersonationSession>(
            r#"
            INSERT INTO impersonation_sessions
                (namespace, actor_id, target_user_id, original_session_id, impersonation_session_id, reason, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(actor_id)
        .bind(target_user_id)
        .bind(original_session_id)
        .bind(impersonation_session_id)
        .bind(reason)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_by_impersonation_session(
        &self,
        namespace: &str,
        impersonation_session_id: Uuid,
    ) -> CoreResult<Option<ImpersonationSession>> {
        sqlx::query_as::<_, ImpersonationSession>(
            "SELECT * FROM impersonation_sessions WHERE namespace = $1 AND impersonation_session_id = $2",
        )
        .bind(namespace)
        .bind(impersonation_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// True when `session_id` is itself already an active impersonated
    /// session for this namespace — used to block chaining.
    pub async fn is_session_impersonated(&self, namespace: &str, session_id: Uuid) -> CoreResult<bool> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM impersonation_sessions
            WHERE namespace = $1 AND impersonation_session_id = $2
              AND ended_at IS NULL AND expires_at > now()
            "#,
        )
        .bind(namespace)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(row.0 > 0)
    }

    pub async fn end(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, impersonation_session_id: Uuid) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE impersonation_sessions SET ended_at = now() WHERE namespace = $1 AND impersonation_session_id = $2 AND ended_at IS NULL",
        )
        .bind(namespace)
        .bind(impersonation_session_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("impersonation session"));
        }
        Ok(())
    }

    // -- operator (cross-namespace) impersonation ----------------------------

    pub async fn start_operator(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        operator_namespace: &str,
        operator_id: Uuid,
        operator_email: &str,
        operator_session_id: Uuid,
        target_namespace: &str,
        target_user_id: Uuid,
        target_user_email: &str,
        impersonation_session_id: Uuid,
        ticket_reference: Option<&str>,
        reason: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<OperatorImpersonationSession> {
        sqlx::query_as::<_, OperatorImpersonationSession>(
            r#"
            INSERT INTO operator_impersonation_sessions
                (operator_namespace, operator_id, operator_email, operator_session_id,
                 target_namespace, target_user_id, target_user_email,
                 impersonation_session_id, ticket_reference, reason, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(operator_namespace)
        .bind(operator_id)
        .bind(operator_email)
        .bind(operator_session_id)
        .bind(target_namespace)
        .bind(target_user_id)
        .bind(target_user_email)
        .bind(impersonation_session_id)
        .bind(ticket_reference)
        .bind(reason)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_operator_by_impersonation_session(
        &self,
        impersonation_session_id: Uuid,
    ) -> CoreResult<Option<OperatorImpersonationSession>> {
        sqlx::query_as::<_, OperatorImpersonationSession>(
            "SELECT * FROM operator_impersonation_sessions WHERE impersonation_session_id = $1",
        )
        .bind(impersonation_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn end_operator(&self, tx: &mut Transaction<'_, Postgres>, impersonation_session_id: Uuid) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE operator_impersonation_sessions SET ended_at = now() WHERE impersonation_session_id = $1 AND ended_at IS NULL",
        )
        .bind(impersonation_session_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("operator impersonation session"));
        }
        Ok(())
    }
}
