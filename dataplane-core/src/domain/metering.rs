//! # Metering Ledger Entities
//!
//! `balance = Σ ledger.amount` and `reserved = Σ {active reservations}` are
//! the two invariants every mutating function here preserves by
//! construction; `reconcile` (see [`crate::service::metering`]) only ever
//! detects a violation, it never causes one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct MeteringAccount {
    pub namespace: String,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub resource: Option<String>,
    pub unit: String,
    pub balance: Decimal,
    pub reserved: Decimal,
    pub total_credited: Decimal,
    pub total_debited: Decimal,
    pub period_start: Option<DateTime<Utc>>,
    pub period_allocation: Option<Decimal>,
    pub carry_over_limit: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl MeteringAccount {
    pub fn available(&self) -> Decimal {
        self.balance - self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Allocation,
    Consumption,
    Expiration,
}

/// Append-only ledger row. `amount` is signed: positive for credits
/// (allocation), negative for debits (consumption, expiration).
#[derive(Debug, Clone, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub namespace: String,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub resource: Option<String>,
    pub unit: String,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub event_time: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub reservation_id: Option<Uuid>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[sqlx(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Committed,
    Released,
}

/// A hold against `available` balance. Does not itself touch `balance`;
/// only `commit` does that.
#[derive(Debug, Clone, FromRow)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub namespace: String,
    pub user_id: Uuid,
    pub event_type: String,
    pub resource: Option<String>,
    pub unit: String,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub actual_amount: Option<Decimal>,
    pub consumption_entry_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

/// One discrepancy row produced by `reconcile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileDiscrepancy {
    pub namespace: String,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub kind: ReconcileDiscrepancyKind,
    pub expected: Decimal,
    pub actual: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileDiscrepancyKind {
    BalanceMismatch,
    ReservedMismatch,
}
