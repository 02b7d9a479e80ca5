//! # Audit Event Payloads
//!
//! One enum per audit domain. Each variant names the event and carries only
//! the fields a reader needs to understand what happened; envelope fields
//! (actor, namespace, timestamps) live on [`crate::context::OperationContext`]
//! and are attached by [`crate::audit::record`], not repeated here.

use serde::Serialize;
use serde_json::{json, Value as Json};

use crate::audit::AuditEvent;

#[derive(Debug, Clone, Serialize)]
pub enum AuthnEvent {
    UserRegistered { user_id: String },
    LoginSucceeded { user_id: String },
    LoginAttemptFailed { email: String },
    LockoutTriggered { email: String, attempt_count: u32, window_seconds: i64 },
    SessionRevoked { session_id: String },
    SessionExtended { session_id: String },
    MfaEnrolled { user_id: String, mfa_type: &'static str },
    MfaRemoved { user_id: String, mfa_type: &'static str },
    OneTimeTokenIssued { user_id: String, token_type: &'static str },
    OneTimeTokenConsumed { user_id: String, token_type: &'static str },
    EmailVerified { user_id: String },
    ApiKeyCreated { user_id: String, key_id: String },
    ApiKeyRevoked { user_id: String, key_id: String },
    PasswordChanged { user_id: String },
    RefreshTokenRotated { family_id: String, generation: i32 },
    RefreshTokenReuseDetected { family_id: String, generation: i32 },
    ImpersonationStarted { actor_id: String, target_user_id: String },
    ImpersonationEnded { actor_id: String, target_user_id: String },
}

impl AuditEvent for AuthnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::UserRegistered { .. } => "user_registered",
            Self::LoginSucceeded { .. } => "login_succeeded",
            Self::LoginAttemptFailed { .. } => "login_attempt_failed",
            Self::LockoutTriggered { .. } => "lockout_triggered",
            Self::SessionRevoked { .. } => "session_revoked",
            Self::SessionExtended { .. } => "session_extended",
            Self::MfaEnrolled { .. } => "mfa_enrolled",
            Self::MfaRemoved { .. } => "mfa_removed",
            Self::OneTimeTokenIssued { .. } => "one_time_token_issued",
            Self::OneTimeTokenConsumed { .. } => "one_time_token_consumed",
            Self::EmailVerified { .. } => "email_verified",
            Self::ApiKeyCreated { .. } => "api_key_created",
            Self::ApiKeyRevoked { .. } => "api_key_revoked",
            Self::PasswordChanged { .. } => "password_changed",
            Self::RefreshTokenRotated { .. } => "refresh_token_rotated",
            Self::RefreshTokenReuseDetected { .. } => "refresh_token_reuse_detected",
            Self::ImpersonationStarted { .. } => "impersonation_started",
            Self::ImpersonationEnded { .. } => "impersonation_ended",
        }
    }

    fn details(&self) -> Json {
        json!(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum AuthzEvent {
    TupleWritten { resource_type: String, resource_id: String, relation: String, subject_type: String, subject_id: String },
    TupleDeleted { resource_type: String, resource_id: String, relation: String, subject_type: String, subject_id: String },
    TupleRejectedCycle { resource_type: String, resource_id: String, relation: String, subject_type: String, subject_id: String },
    HierarchyRuleWritten { resource_type: String, permission: String, implies: String },
    ExpiredTuplesPurged { count: u64 },
}

impl AuditEvent for AuthzEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::TupleWritten { .. } => "tuple_written",
            Self::TupleDeleted { .. } => "tuple_deleted",
            Self::TupleRejectedCycle { .. } => "tuple_rejected_cycle",
            Self::HierarchyRuleWritten { .. } => "hierarchy_rule_written",
            Self::ExpiredTuplesPurged { .. } => "expired_tuples_purged",
        }
    }

    fn details(&self) -> Json {
        json!(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum ConfigEvent {
    Set { key: String, version: i32 },
    SetDefault { key: String, version: i32 },
    Activated { key: String, version: i32 },
    RolledBack { key: String, from_version: i32, to_version: i32 },
    Merged { key: String, version: i32 },
}

impl AuditEvent for ConfigEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Set { .. } => "config_set",
            Self::SetDefault { .. } => "config_set_default",
            Self::Activated { .. } => "config_activated",
            Self::RolledBack { .. } => "config_rolled_back",
            Self::Merged { .. } => "config_merged",
        }
    }

    fn details(&self) -> Json {
        json!(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum OperatorEvent {
    CrossNamespaceImpersonationStarted { target_namespace: String, target_user_id: String, ticket_reference: Option<String> },
    CrossNamespaceImpersonationEnded { target_namespace: String, target_user_id: String },
}

impl AuditEvent for OperatorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::CrossNamespaceImpersonationStarted { .. } => "operator_impersonation_started",
            Self::CrossNamespaceImpersonationEnded { .. } => "operator_impersonation_ended",
        }
    }

    fn details(&self) -> Json {
        json!(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum MeterEvent {
    Allocated { event_type: String, amount: String, idempotency_key: Option<String> },
    Consumed { event_type: String, amount: String, idempotency_key: Option<String> },
    Reserved { event_type: String, reservation_id: String, amount: String },
    ReservationCommitted { reservation_id: String, actual_amount: String },
    ReservationReleased { reservation_id: String },
    ReservationsExpired { count: u64 },
    PeriodOpened { event_type: String, period_start: String, period_allocation: Option<String> },
    PeriodClosed { event_type: String, period_start: String, carried_over: String },
    DiscrepancyDetected { event_type: String, kind: &'static str, expected: String, actual: String },
}

impl AuditEvent for MeterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Allocated { .. } => "meter_allocated",
            Self::Consumed { .. } => "meter_consumed",
            Self::Reserved { .. } => "meter_reserved",
            Self::ReservationCommitted { .. } => "meter_reservation_committed",
            Self::ReservationReleased { .. } => "meter_reservation_released",
            Self::ReservationsExpired { .. } => "meter_reservations_expired",
            Self::PeriodOpened { .. } => "meter_period_opened",
            Self::PeriodClosed { .. } => "meter_period_closed",
            Self::DiscrepancyDetected { .. } => "meter_discrepancy_detected",
        }
    }

    fn details(&self) -> Json {
        json!(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authn_event_type_matches_variant() {
        let event = AuthnEvent::RefreshTokenReuseDetected { family_id: "f".into(), generation: 3 };
        assert_eq!(event.event_type(), "refresh_token_reuse_detected");
        assert_eq!(event.details()["generation"], 3);
    }

    #[test]
    fn meter_event_details_carry_amount_as_string() {
        let event = MeterEvent::Consumed { event_type: "api_calls".into(), amount: "12.5".into(), idempotency_key: None };
        assert_eq!(event.details()["amount"], "12.5");
    }
}
