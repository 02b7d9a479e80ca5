//! # Refresh-Token Family Entity
//!
//! A refresh token belongs to a `family_id`: the set of tokens produced by
//! repeated rotation of one another. Within a family, at most one token has
//! `replaced_by IS NULL AND revoked_at IS NULL` — the "current" token.
//! Presenting a token whose `replaced_by` is already set is reuse of a
//! stale token and revokes the whole family.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub namespace: String,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub generation: i32,
    pub replaced_by: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// A token is current iff it has not been replaced and has not been
    /// revoked.
    pub fn is_current(&self) -> bool {
        self.replaced_by.is_none() && self.revoked_at.is_none()
    }

    /// A token is usable for rotation iff it is current, not revoked, and
    /// not expired as of `now`.
    pub fn is_rotatable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Outcome of a successful [`crate::service::refresh::rotate`] call.
#[derive(Debug, Clone)]
pub struct RotatedToken {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub new_token_id: Uuid,
    pub family_id: Uuid,
    pub generation: i32,
    pub expires_at: DateTime<Utc>,
}
