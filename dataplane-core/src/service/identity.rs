//! # Identity Service
//!
//! Orchestrates user lifecycle, session issuance, one-time tokens, API keys
//! and MFA enrolment on top of [`crate::repository::IdentityRepository`].
//! Credential hashing and token-secret generation are the caller's
//! responsibility — this service only ever sees already-hashed material,
//! matching the boundary the operation contract draws around "the data
//! plane never sees a plaintext secret".

use chrono::{DateTime, Duration, Utc};
use shared::errors::{CoreError, CoreResult};
use shared::validation::{normalize_email, validate_hash};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditDomain};
use crate::context::OperationContext;
use crate::domain::events::AuthnEvent;
use crate::domain::identity::{ApiKey, MfaEnrolment, MfaType, OneTimeToken, Session, TokenType, User};
use crate::repository::IdentityRepository;

#[derive(Debug, Clone)]
pub struct IdentityService {
    pool: PgPool,
    repo: IdentityRepository,
}

impl IdentityService {
    pub fn new(pool: PgPool) -> Self {
        let repo = IdentityRepository::new(pool.clone());
        Self { pool, repo }
    }

    pub async fn register(&self, ctx: &OperationContext, email: &str, password_hash: Option<&str>) -> CoreResult<User> {
        ctx.validate()?;
        let email = normalize_email(email)?;
        if let Some(hash) = password_hash {
            validate_hash("password_hash", hash)?;
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let user = self.repo.create_user(&mut tx, &ctx.namespace, &email, password_hash).await?;

        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::UserRegistered { user_id: user.id.to_string() },
            Some("user"),
            Some(&user.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(user)
    }

    /// Records a login attempt and, if the failure threshold configured by
    /// `max_attempts` within `window` is crossed, emits a lockout event.
    /// Does not itself refuse the login — callers decide what a lockout
    /// means for their flow.
    pub async fn record_login_attempt(
        &self,
        ctx: &OperationContext,
        email: &str,
        success: bool,
        max_attempts: u32,
        window: Duration,
    ) -> CoreResult<bool> {
        ctx.validate()?;
        let email = normalize_email(email)?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.record_login_attempt(&mut tx, &ctx.namespace, &email, success, ctx.ip_address.as_deref()).await?;

        if success {
            tx.commit().await.map_err(CoreError::Database)?;
            return Ok(false);
        }

        let since = Utc::now() - window;
        let failures = self.repo.count_failed_attempts_since(&mut tx, &ctx.namespace, &email, since).await?;
        let newly_locked_out = failures == max_attempts as i64;
        let locked_out = failures >= max_attempts as i64;

        if newly_locked_out {
            audit::record(
                &mut tx,
                AuditDomain::Authn,
                ctx,
                &AuthnEvent::LockoutTriggered { email: email.clone(), attempt_count: failures as u32, window_seconds: window.num_seconds() },
                Some("user"),
                Some(&email),
                None,
                None,
            )
            .await?;
        } else {
            audit::record(&mut tx, AuditDomain::Authn, ctx, &AuthnEvent::LoginAttemptFailed { email: email.clone() }, Some("user"), Some(&email), None, None).await?;
        }
        tx.commit().await.map_err(CoreError::Database)?;

        Ok(locked_out)
    }

    pub async fn find_by_email(&self, namespace: &str, email: &str) -> CoreResult<Option<User>> {
        let email = normalize_email(email)?;
        self.repo.find_user_by_email(namespace, &email).await
    }

    pub async fn find_by_id(&self, namespace: &str, user_id: Uuid) -> CoreResult<Option<User>> {
        self.repo.find_user_by_id(namespace, user_id).await
    }

    pub async fn change_password(&self, ctx: &OperationContext, user_id: Uuid, new_password_hash: &str) -> CoreResult<()> {
        ctx.validate()?;
        validate_hash("new_password_hash", new_password_hash)?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.update_password(&mut tx, &ctx.namespace, user_id, new_password_hash).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::PasswordChanged { user_id: user_id.to_string() },
            Some("user"),
            Some(&user_id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }

    // -- sessions -----------------------------------------------------------

    pub async fn create_session(&self, ctx: &OperationContext, user_id: Uuid, token_hash: &str, duration: Duration) -> CoreResult<Session> {
        ctx.validate()?;
        validate_hash("token_hash", token_hash)?;
        let expires_at = Utc::now() + duration;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let session = self
            .repo
            .create_session(&mut tx, &ctx.namespace, user_id, token_hash, expires_at, ctx.ip_address.as_deref(), ctx.user_agent.as_deref())
            .await?;
        audit::record(&mut tx, AuditDomain::Authn, ctx, &AuthnEvent::LoginSucceeded { user_id: user_id.to_string() }, Some("user"), Some(&user_id.to_string()), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(session)
    }

    pub async fn validate_session(&self, namespace: &str, token_hash: &str) -> CoreResult<Session> {
        self.repo
            .find_active_session_by_hash(namespace, token_hash)
            .await?
            .ok_or_else(|| CoreError::not_found("session"))
    }

    pub async fn extend_session(&self, ctx: &OperationContext, session_id: Uuid, duration: Duration) -> CoreResult<()> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.extend_session(&mut tx, &ctx.namespace, session_id, Utc::now() + duration).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::SessionExtended { session_id: session_id.to_string() },
            Some("session"),
            Some(&session_id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn revoke_session(&self, ctx: &OperationContext, session_id: Uuid) -> CoreResult<()> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.revoke_session(&mut tx, &ctx.namespace, session_id).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::SessionRevoked { session_id: session_id.to_string() },
            Some("session"),
            Some(&session_id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, namespace: &str, user_id: Uuid) -> CoreResult<u64> {
        self.repo.revoke_all_sessions(namespace, user_id).await
    }

    // -- one-time tokens ------------------------------------------------------

    pub async fn issue_one_time_token(
        &self,
        ctx: &OperationContext,
        user_id: Uuid,
        token_hash: &str,
        token_type: TokenType,
        duration: Duration,
    ) -> CoreResult<OneTimeToken> {
        ctx.validate()?;
        validate_hash("token_hash", token_hash)?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let token = self.repo.create_one_time_token(&mut tx, &ctx.namespace, user_id, token_hash, token_type, Utc::now() + duration).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::OneTimeTokenIssued { user_id: user_id.to_string(), token_type: token_type_label(token_type) },
            Some("one_time_token"),
            Some(&token.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(token)
    }

    pub async fn consume_one_time_token(&self, ctx: &OperationContext, token_hash: &str, token_type: TokenType) -> CoreResult<OneTimeToken> {
        ctx.validate()?;
        let token = self
            .repo
            .find_valid_one_time_token(&ctx.namespace, token_hash, token_type)
            .await?
            .ok_or_else(|| CoreError::not_found("one-time token"))?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.mark_one_time_token_used(&mut tx, &ctx.namespace, token.id).await?;
        let email_verified = matches!(token_type, TokenType::EmailVerify);
        if email_verified {
            let at: DateTime<Utc> = Utc::now();
            self.repo.set_email_verified(&mut tx, &ctx.namespace, token.user_id, at).await?;
        }

        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::OneTimeTokenConsumed { user_id: token.user_id.to_string(), token_type: token_type_label(token_type) },
            Some("one_time_token"),
            Some(&token.id.to_string()),
            None,
            None,
        )
        .await?;
        if email_verified {
            audit::record(
                &mut tx,
                AuditDomain::Authn,
                ctx,
                &AuthnEvent::EmailVerified { user_id: token.user_id.to_string() },
                Some("user"),
                Some(&token.user_id.to_string()),
                None,
                None,
            )
            .await?;
        }
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(token)
    }

    // -- API keys --------------------------------------------------------------

    pub async fn create_api_key(&self, ctx: &OperationContext, user_id: Uuid, key_hash: &str, name: &str, expires_at: Option<DateTime<Utc>>) -> CoreResult<ApiKey> {
        ctx.validate()?;
        validate_hash("key_hash", key_hash)?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let key = self.repo.create_api_key(&mut tx, &ctx.namespace, user_id, key_hash, name, expires_at).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::ApiKeyCreated { user_id: user_id.to_string(), key_id: key.id.to_string() },
            Some("api_key"),
            Some(&key.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(key)
    }

    pub async fn authenticate_api_key(&self, namespace: &str, key_hash: &str) -> CoreResult<ApiKey> {
        let key = self
            .repo
            .find_active_api_key_by_hash(namespace, key_hash)
            .await?
            .ok_or_else(|| CoreError::not_found("api key"))?;
        self.repo.touch_api_key_last_used(namespace, key.id).await?;
        Ok(key)
    }

    pub async fn revoke_api_key(&self, ctx: &OperationContext, key_id: Uuid) -> CoreResult<()> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let key = self.repo.revoke_api_key(&mut tx, &ctx.namespace, key_id).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::ApiKeyRevoked { user_id: key.user_id.to_string(), key_id: key.id.to_string() },
            Some("api_key"),
            Some(&key.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }

    // -- MFA ---------------------------------------------------------------------

    pub async fn enrol_mfa(&self, ctx: &OperationContext, user_id: Uuid, mfa_type: MfaType, secret: &str, name: Option<&str>) -> CoreResult<MfaEnrolment> {
        ctx.validate()?;
        validate_hash("secret", secret)?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let enrolment = self.repo.create_mfa_enrolment(&mut tx, &ctx.namespace, user_id, mfa_type, secret, name).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::MfaEnrolled { user_id: user_id.to_string(), mfa_type: mfa_type_label(mfa_type) },
            Some("mfa_enrolment"),
            Some(&enrolment.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(enrolment)
    }

    pub async fn list_mfa_enrolments(&self, namespace: &str, user_id: Uuid) -> CoreResult<Vec<MfaEnrolment>> {
        self.repo.list_mfa_enrolments(namespace, user_id).await
    }

    pub async fn touch_mfa(&self, namespace: &str, enrolment_id: Uuid) -> CoreResult<()> {
        self.repo.touch_mfa_last_used(namespace, enrolment_id).await
    }

    pub async fn remove_mfa(&self, ctx: &OperationContext, enrolment_id: Uuid) -> CoreResult<()> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let enrolment = self.repo.delete_mfa_enrolment(&mut tx, &ctx.namespace, enrolment_id).await?;
        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::MfaRemoved { user_id: enrolment.user_id.to_string(), mfa_type: mfa_type_label(enrolment.mfa_type) },
            Some("mfa_enrolment"),
            Some(&enrolment.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }
}

fn token_type_label(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::PasswordReset => "password_reset",
        TokenType::EmailVerify => "email_verify",
        TokenType::MagicLink => "magic_link",
    }
}

fn mfa_type_label(mfa_type: MfaType) -> &'static str {
    match mfa_type {
        MfaType::Totp => "totp",
        MfaType::Webauthn => "webauthn",
        MfaType::RecoveryCodes => "recovery_codes",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_type_labels_are_stable() {
        assert_eq!(token_type_label(TokenType::EmailVerify), "email_verify");
        assert_eq!(mfa_type_label(MfaType::Totp), "totp");
    }
}
