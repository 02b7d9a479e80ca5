//! # Identity Entities
//!
//! Users, sessions, one-time tokens, API keys, MFA enrolments and login
//! attempts. `User` carries the password-hash slot but is never returned
//! directly by any service function other than `get_credentials` — every
//! other path returns [`UserProfile`], the redacted view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Complete user record, including the password-hash slot.
///
/// Never serialize this type back to a caller outside `get_credentials`;
/// use [`UserProfile`] everywhere else.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub namespace: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Redacted view of [`User`], safe to return from any non-credential path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub namespace: String,
    pub email: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            namespace: u.namespace,
            email: u.email,
            email_verified_at: u.email_verified_at,
            disabled_at: u.disabled_at,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Opaque-token-hash session.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub namespace: String,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Kind of one-time token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "snake_case")]
pub enum TokenType {
    PasswordReset,
    EmailVerify,
    MagicLink,
}

/// Single-use, namespace-scoped token (password reset, email verification,
/// magic link).
#[derive(Debug, Clone, FromRow)]
pub struct OneTimeToken {
    pub id: Uuid,
    pub namespace: String,
    pub user_id: Uuid,
    pub token_hash: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Long-lived, revocable API key.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub namespace: String,
    pub user_id: Uuid,
    pub key_hash: String,
    pub name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Kind of MFA factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "snake_case")]
pub enum MfaType {
    Totp,
    Webauthn,
    RecoveryCodes,
}

/// One enrolled MFA factor. `secret` is opaque and only ever returned by
/// `get_mfa`.
#[derive(Debug, Clone, FromRow)]
pub struct MfaEnrolment {
    pub id: Uuid,
    pub namespace: String,
    pub user_id: Uuid,
    pub mfa_type: MfaType,
    pub secret: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// One recorded login attempt, used by the lockout predicate.
#[derive(Debug, Clone, FromRow)]
pub struct LoginAttempt {
    pub namespace: String,
    pub email: String,
    pub success: bool,
    pub ip_address: Option<String>,
    pub attempted_at: DateTime<Utc>,
}
