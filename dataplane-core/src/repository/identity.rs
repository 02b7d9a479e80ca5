//! # Identity Repository
//!
//! Data access for users, sessions, one-time tokens, API keys, MFA
//! enrolments and login attempts. Every query is scoped by `namespace` —
//! this is a multi-tenant store and there is no cross-tenant lookup path
//! anywhere in this file.

use chrono::{DateTime, Utc};
use shared::errors::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::identity::{ApiKey, LoginAttempt, MfaEnrolment, MfaType, OneTimeToken, Session, TokenType, User};

#[derive(Debug, Clone)]
pub struct IdentityRepository {
    pool: PgPool,
}

impl IdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // -- users ---------------------------------------------------------

    pub async fn create_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        email: &str,
        password_hash: Option<&str>,
    ) -> CoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (namespace, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("users_namespace_email_key") {
                    return CoreError::Conflict { resource: "user email".into() };
                }
            }
            CoreError::Database(e)
        })
    }

    pub async fn find_user_by_id(&self, namespace: &str, user_id: Uuid) -> CoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE namespace = $1 AND id = $2")
            .bind(namespace)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::Database)
    }

    pub async fn find_user_by_email(&self, namespace: &str, email: &str) -> CoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE namespace = $1 AND email = $2")
            .bind(namespace)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::Database)
    }

    pub async fn update_password(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        password_hash: &str,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $1, updated_at = now() WHERE namespace = $2 AND id = $3",
        )
        .bind(password_hash)
        .bind(namespace)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user"));
        }
        Ok(())
    }

    pub async fn set_email_verified(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, user_id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("UPDATE users SET email_verified_at = $1, updated_at = now() WHERE namespace = $2 AND id = $3")
            .bind(at)
            .bind(namespace)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn set_disabled(&self, namespace: &str, user_id: Uuid, disabled_at: Option<DateTime<Utc>>) -> CoreResult<()> {
        sqlx::query("UPDATE users SET disabled_at = $1, updated_at = now() WHERE namespace = $2 AND id = $3")
            .bind(disabled_at)
            .bind(namespace)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    // -- sessions --------------------------------------------------------

    pub async fn create_session(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> CoreResult<Session> {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (namespace, user_id, token_hash, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_active_session_by_hash(&self, namespace: &str, token_hash: &str) -> CoreResult<Option<Session>> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE namespace = $1 AND token_hash = $2 AND revoked_at IS NULL AND expires_at > now()
            "#,
        )
        .bind(namespace)
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn extend_session(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, session_id: Uuid, new_expiry: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET expires_at = $1 WHERE namespace = $2 AND id = $3 AND revoked_at IS NULL",
        )
        .bind(new_expiry)
        .bind(namespace)
        .bind(session_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("session"));
        }
        Ok(())
    }

    pub async fn revoke_session(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, session_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE sessions SET revoked_at = now() WHERE namespace = $1 AND id = $2 AND revoked_at IS NULL")
            .bind(namespace)
            .bind(session_id)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, namespace: &str, user_id: Uuid) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = now() WHERE namespace = $1 AND user_id = $2 AND revoked_at IS NULL",
        )
        .bind(namespace)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }

    // -- one-time tokens ---------------------------------------------------

    pub async fn create_one_time_token(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        token_hash: &str,
        token_type: TokenType,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<OneTimeToken> {
        sqlx::query_as::<_, OneTimeToken>(
            r#"
            INSERT INTO one_time_tokens (namespace, user_id, token_hash, token_type, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(token_hash)
        .bind(token_type)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_valid_one_time_token(
        &self,
        namespace: &str,
        token_hash: &str,
        token_type: TokenType,
    ) -> CoreResult<Option<OneTimeToken>> {
        sqlx::query_as::<_, OneTimeToken>(
            r#"
            SELECT * FROM one_time_tokens
            WHERE namespace = $1 AND token_hash = $2 AND token_type = $3
              AND used_at IS NULL AND expires_at > now()
            "#,
        )
        .bind(namespace)
        .bind(token_hash)
        .bind(token_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn mark_one_time_token_used(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, token_id: Uuid) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE one_time_tokens SET used_at = now() WHERE namespace = $1 AND id = $2 AND used_at IS NULL",
        )
        .bind(namespace)
        .bind(token_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict { resource: "one-time token already used".into() });
        }
        Ok(())
    }

    // -- api keys -----------------------------------------------------------

    pub async fn create_api_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        key_hash: &str,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<ApiKey> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (namespace, user_id, key_hash, name, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(key_hash)
        .bind(name)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_active_api_key_by_hash(&self, namespace: &str, key_hash: &str) -> CoreResult<Option<ApiKey>> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT * FROM api_keys
            WHERE namespace = $1 AND key_hash = $2 AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace)
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn touch_api_key_last_used(&self, namespace: &str, key_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE namespace = $1 AND id = $2")
            .bind(namespace)
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn revoke_api_key(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, key_id: Uuid) -> CoreResult<ApiKey> {
        sqlx::query_as::<_, ApiKey>(
            "UPDATE api_keys SET revoked_at = now() WHERE namespace = $1 AND id = $2 AND revoked_at IS NULL RETURNING *",
        )
        .bind(namespace)
        .bind(key_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CoreError::Database)?
        .ok_or_else(|| CoreError::not_found("api key"))
    }

    // -- MFA ------------------------------------------------------------------

    pub async fn create_mfa_enrolment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        mfa_type: MfaType,
        secret: &str,
        name: Option<&str>,
    ) -> CoreResult<MfaEnrolment> {
        sqlx::query_as::<_, MfaEnrolment>(
            r#"
            INSERT INTO mfa_enrolments (namespace, user_id, mfa_type, secret, name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(mfa_type)
        .bind(secret)
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn list_mfa_enrolments(&self, namespace: &str, user_id: Uuid) -> CoreResult<Vec<MfaEnrolment>> {
        sqlx::query_as::<_, MfaEnrolment>(
            "SELECT * FROM mfa_enrolments WHERE namespace = $1 AND user_id = $2 ORDER BY created_at",
        )
        .bind(namespace)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn touch_mfa_last_used(&self, namespace: &str, enrolment_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE mfa_enrolments SET last_used_at = now() WHERE namespace = $1 AND id = $2")
            .bind(namespace)
            .bind(enrolment_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn delete_mfa_enrolment(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, enrolment_id: Uuid) -> CoreResult<MfaEnrolment> {
        sqlx::query_as::<_, MfaEnrolment>("DELETE FROM mfa_enrolments WHERE namespace = $1 AND id = $2 RETURNING *")
            .bind(namespace)
            .bind(enrolment_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::not_found("mfa enrolment"))
    }

    // -- login attempts ---------------------------------------------------

    pub async fn record_login_attempt(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, email: &str, success: bool, ip_address: Option<&str>) -> CoreResult<()> {
        sqlx::query("INSERT INTO login_attempts (namespace, email, success, ip_address) VALUES ($1, $2, $3, $4)")
            .bind(namespace)
            .bind(email)
            .bind(success)
            .bind(ip_address)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    /// Count of failed attempts for `email` since `since`, used to decide
    /// whether a lockout should trigger. Reads inside the caller's
    /// transaction so it sees the attempt `record_login_attempt` just
    /// inserted there.
    pub async fn count_failed_attempts_since(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, email: &str, since: DateTime<Utc>) -> CoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM login_attempts
            WHERE namespace = $1 AND email = $2 AND success = false AND attempted_at > $3
            "#,
        )
        .bind(namespace)
        .bind(email)
        .bind(since)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)?;
        Ok(row.0)
    }

    pub async fn list_recent_attempts(&self, namespace: &str, email: &str, since: DateTime<Utc>) -> CoreResult<Vec<LoginAttempt>> {
        sqlx::query_as::<_, LoginAttempt>(
            "SELECT * FROM login_attempts WHERE namespace = $1 AND email = $2 AND attempted_at > $3 ORDER BY attempted_at",
        )
        .bind(namespace)
        .bind(email)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn delete_attempts_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE attempted_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }
}
