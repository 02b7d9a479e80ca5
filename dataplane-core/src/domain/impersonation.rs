//! # Impersonation Entities
//!
//! Regular impersonation binds a real session to a target user within the
//! same namespace. Operator impersonation is the cross-namespace variant:
//! it carries email snapshots instead of foreign keys, since the operator
//! and target live in different tenants.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Same-namespace impersonation session.
#[derive(Debug, Clone, FromRow)]
pub struct ImpersonationSession {
    pub id: Uuid,
    pub namespace: String,
    pub actor_id: Uuid,
    pub target_user_id: Uuid,
    pub original_session_id: Uuid,
    pub impersonation_session_id: Uuid,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ImpersonationSession {
    /// Still in effect: not ended, not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.is_none() && self.expires_at > now
    }
}

/// Cross-namespace operator impersonation session. Deliberately unconstrained
/// by foreign keys into either namespace's user table — access is mediated
/// by caller policy, not by referential integrity.
#[derive(Debug, Clone, FromRow)]
pub struct OperatorImpersonationSession {
    pub id: Uuid,
    pub operator_namespace: String,
    pub operator_id: Uuid,
    pub operator_email: String,
    pub operator_session_id: Uuid,
    pub target_namespace: String,
    pub target_user_id: Uuid,
    pub target_user_email: String,
    pub impersonation_session_id: Uuid,
    pub ticket_reference: Option<String>,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl OperatorImpersonationSession {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.is_none() && self.expires_at > now
    }
}

/// Result of `get_impersonation_context`.
#[derive(Debug, Clone)]
pub struct ImpersonationContext {
    pub is_impersonating: bool,
    pub actor_id: Option<Uuid>,
    pub target_user_id: Option<Uuid>,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ImpersonationContext {
    pub fn none() -> Self {
        Self { is_impersonating: false, actor_id: None, target_user_id: None, reason: None, expires_at: None }
    }
}
