//! # Metering Ledger Service
//!
//! Every mutating call locks the account row first (`lock_or_create_account`
//! takes `FOR UPDATE`), which is what makes the idempotency-key check safe:
//! two concurrent calls for the same account serialize on that row lock, so
//! "look up by idempotency key, insert if absent" never races.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use shared::errors::{CoreError, CoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditDomain};
use crate::context::OperationContext;
use crate::domain::events::MeterEvent;
use crate::domain::metering::{
    LedgerEntry, LedgerEntryType, MeteringAccount, ReconcileDiscrepancy, ReconcileDiscrepancyKind, Reservation,
};
use crate::repository::MeteringRepository;

#[derive(Debug, Clone)]
pub struct MeteringService {
    pool: PgPool,
    repo: MeteringRepository,
}

/// Outcome of a `consume` call when `check_balance` rejects it.
#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub success: bool,
    pub balance: Decimal,
    pub available: Decimal,
    pub entry: Option<LedgerEntry>,
}

/// Outcome of a `reserve` call.
#[derive(Debug, Clone)]
pub struct ReserveOutcome {
    pub granted: bool,
    pub reservation: Option<Reservation>,
}

impl MeteringService {
    pub fn new(pool: PgPool) -> Self {
        Self { repo: MeteringRepository::new(pool.clone()), pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn allocate(
        &self,
        ctx: &OperationContext,
        user_id: Option<Uuid>,
        event_type: &str,
        amount: Decimal,
        unit: &str,
        resource: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> CoreResult<LedgerEntry> {
        ctx.validate()?;
        if amount <= Decimal::ZERO {
            return Err(CoreError::invalid_parameter("amount", "allocation amount must be positive"));
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let account = self.repo.lock_or_create_account(&mut tx, &ctx.namespace, user_id, event_type, resource, unit).await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.repo.find_by_idempotency_key(&ctx.namespace, key).await? {
                tx.rollback().await.map_err(CoreError::Database)?;
                return Ok(existing);
            }
        }

        let new_balance = account.balance + amount;
        let entry = self
            .repo
            .insert_ledger_entry(&mut tx, &ctx.namespace, user_id, event_type, resource, unit, LedgerEntryType::Allocation, amount, new_balance, idempotency_key, None, ctx.actor_id.as_deref())
            .await?;
        self.repo.apply_delta(&mut tx, &ctx.namespace, user_id, event_type, amount, Decimal::ZERO, amount, Decimal::ZERO).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::Allocated { event_type: event_type.to_string(), amount: amount.to_string(), idempotency_key: idempotency_key.map(str::to_string) }, Some("metering_account"), user_id.map(|u| u.to_string()).as_deref(), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(entry)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn consume(
        &self,
        ctx: &OperationContext,
        user_id: Option<Uuid>,
        event_type: &str,
        amount: Decimal,
        unit: &str,
        resource: Option<&str>,
        idempotency_key: Option<&str>,
        check_balance: bool,
    ) -> CoreResult<ConsumeOutcome> {
        ctx.validate()?;
        if amount <= Decimal::ZERO {
            return Err(CoreError::invalid_parameter("amount", "consumption amount must be positive"));
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let account = self.repo.lock_or_create_account(&mut tx, &ctx.namespace, user_id, event_type, resource, unit).await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.repo.find_by_idempotency_key(&ctx.namespace, key).await? {
                tx.rollback().await.map_err(CoreError::Database)?;
                return Ok(ConsumeOutcome { success: true, balance: existing.balance_after, available: existing.balance_after - account.reserved, entry: Some(existing) });
            }
        }

        if check_balance && account.available() < amount {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(ConsumeOutcome { success: false, balance: account.balance, available: account.available(), entry: None });
        }

        let new_balance = account.balance - amount;
        let entry = self
            .repo
            .insert_ledger_entry(&mut tx, &ctx.namespace, user_id, event_type, resource, unit, LedgerEntryType::Consumption, -amount, new_balance, idempotency_key, None, ctx.actor_id.as_deref())
            .await?;
        self.repo.apply_delta(&mut tx, &ctx.namespace, user_id, event_type, -amount, Decimal::ZERO, Decimal::ZERO, amount).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::Consumed { event_type: event_type.to_string(), amount: amount.to_string(), idempotency_key: idempotency_key.map(str::to_string) }, Some("metering_account"), user_id.map(|u| u.to_string()).as_deref(), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(ConsumeOutcome { success: true, balance: new_balance, available: new_balance - account.reserved, entry: Some(entry) })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn reserve(
        &self,
        ctx: &OperationContext,
        user_id: Uuid,
        event_type: &str,
        amount: Decimal,
        unit: &str,
        resource: Option<&str>,
        ttl_seconds: i64,
        idempotency_key: Option<&str>,
    ) -> CoreResult<ReserveOutcome> {
        ctx.validate()?;
        if amount <= Decimal::ZERO {
            return Err(CoreError::invalid_parameter("amount", "reservation amount must be positive"));
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let account = self.repo.lock_or_create_account(&mut tx, &ctx.namespace, Some(user_id), event_type, resource, unit).await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.repo.find_reservation_by_idempotency_key(&ctx.namespace, key).await? {
                tx.rollback().await.map_err(CoreError::Database)?;
                let granted = matches!(existing.status, crate::domain::metering::ReservationStatus::Active);
                return Ok(ReserveOutcome { granted, reservation: Some(existing) });
            }
        }

        if account.available() < amount {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(ReserveOutcome { granted: false, reservation: None });
        }

        let expires_at = Utc::now() + Duration::seconds(ttl_seconds);
        let reservation = self.repo.insert_reservation(&mut tx, &ctx.namespace, user_id, event_type, resource, unit, amount, expires_at, idempotency_key).await?;
        self.repo.apply_delta(&mut tx, &ctx.namespace, Some(user_id), event_type, Decimal::ZERO, amount, Decimal::ZERO, Decimal::ZERO).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::Reserved { event_type: event_type.to_string(), reservation_id: reservation.reservation_id.to_string(), amount: amount.to_string() }, Some("reservation"), Some(&reservation.reservation_id.to_string()), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(ReserveOutcome { granted: true, reservation: Some(reservation) })
    }

    /// `actual` may exceed the reserved amount; overage is the caller's
    /// policy, not rejected here.
    pub async fn commit(&self, ctx: &OperationContext, reservation_id: Uuid, actual_amount: Decimal) -> CoreResult<Reservation> {
        ctx.validate()?;
        if actual_amount < Decimal::ZERO {
            return Err(CoreError::invalid_parameter("actual_amount", "must not be negative"));
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let reservation = self.repo.lock_reservation(&mut tx, &ctx.namespace, reservation_id).await?.ok_or_else(|| CoreError::not_found("reservation"))?;
        if !matches!(reservation.status, crate::domain::metering::ReservationStatus::Active) {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Err(CoreError::not_found("active reservation"));
        }

        let account = self
            .repo
            .lock_or_create_account(&mut tx, &ctx.namespace, Some(reservation.user_id), &reservation.event_type, reservation.resource.as_deref(), &reservation.unit)
            .await?;

        let mut consumption_entry_id = reservation_id;
        if actual_amount > Decimal::ZERO {
            let new_balance = account.balance - actual_amount;
            let entry = self
                .repo
                .insert_ledger_entry(&mut tx, &ctx.namespace, Some(reservation.user_id), &reservation.event_type, reservation.resource.as_deref(), &reservation.unit, LedgerEntryType::Consumption, -actual_amount, new_balance, None, Some(reservation_id), ctx.actor_id.as_deref())
                .await?;
            consumption_entry_id = entry.id;
        }

        self.repo
            .apply_delta(&mut tx, &ctx.namespace, Some(reservation.user_id), &reservation.event_type, -actual_amount, -reservation.amount, Decimal::ZERO, actual_amount)
            .await?;
        self.repo.mark_committed(&mut tx, &ctx.namespace, reservation_id, actual_amount, consumption_entry_id).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::ReservationCommitted { reservation_id: reservation_id.to_string(), actual_amount: actual_amount.to_string() }, Some("reservation"), Some(&reservation_id.to_string()), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;

        Ok(Reservation { status: crate::domain::metering::ReservationStatus::Committed, actual_amount: Some(actual_amount), consumption_entry_id: Some(consumption_entry_id), ..reservation })
    }

    pub async fn release(&self, ctx: &OperationContext, reservation_id: Uuid) -> CoreResult<()> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let reservation = self.repo.lock_reservation(&mut tx, &ctx.namespace, reservation_id).await?.ok_or_else(|| CoreError::not_found("reservation"))?;
        if !matches!(reservation.status, crate::domain::metering::ReservationStatus::Active) {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Err(CoreError::not_found("active reservation"));
        }

        self.repo.apply_delta(&mut tx, &ctx.namespace, Some(reservation.user_id), &reservation.event_type, Decimal::ZERO, -reservation.amount, Decimal::ZERO, Decimal::ZERO).await?;
        self.repo.mark_released(&mut tx, &ctx.namespace, reservation_id).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::ReservationReleased { reservation_id: reservation_id.to_string() }, Some("reservation"), Some(&reservation_id.to_string()), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }

    /// Sweeps expired active reservations, releasing each under `SKIP
    /// LOCKED` so a concurrent sweeper instance never blocks on this one.
    pub async fn release_expired_reservations(&self, ctx: &OperationContext) -> CoreResult<u64> {
        ctx.validate()?;
        let now = Utc::now();
        let candidates = self.repo.find_expired_active(&ctx.namespace, now).await?;
        let mut released = 0u64;

        for candidate in candidates {
            let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
            let Some(reservation) = self.repo.lock_expired_active(&mut tx, &ctx.namespace, candidate.reservation_id, now).await? else {
                tx.rollback().await.map_err(CoreError::Database)?;
                continue;
            };
            self.repo.apply_delta(&mut tx, &ctx.namespace, Some(reservation.user_id), &reservation.event_type, Decimal::ZERO, -reservation.amount, Decimal::ZERO, Decimal::ZERO).await?;
            self.repo.mark_released(&mut tx, &ctx.namespace, reservation.reservation_id).await?;
            tx.commit().await.map_err(CoreError::Database)?;
            released += 1;
        }

        if released > 0 {
            let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
            audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::ReservationsExpired { count: released }, None, None, None, None).await?;
            tx.commit().await.map_err(CoreError::Database)?;
        }
        Ok(released)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn open_period(
        &self,
        ctx: &OperationContext,
        user_id: Option<Uuid>,
        event_type: &str,
        unit: &str,
        resource: Option<&str>,
        period_start: DateTime<Utc>,
        allocation: Option<Decimal>,
    ) -> CoreResult<MeteringAccount> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let account = self.repo.lock_or_create_account(&mut tx, &ctx.namespace, user_id, event_type, resource, unit).await?;

        if let Some(amount) = allocation {
            let new_balance = account.balance + amount;
            self.repo
                .insert_ledger_entry(&mut tx, &ctx.namespace, user_id, event_type, resource, unit, LedgerEntryType::Allocation, amount, new_balance, None, None, ctx.actor_id.as_deref())
                .await?;
            self.repo.apply_delta(&mut tx, &ctx.namespace, user_id, event_type, amount, Decimal::ZERO, amount, Decimal::ZERO).await?;
        }
        self.repo.set_period(&mut tx, &ctx.namespace, user_id, event_type, Some(period_start), allocation, account.carry_over_limit).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::PeriodOpened { event_type: event_type.to_string(), period_start: period_start.to_rfc3339(), period_allocation: allocation.map(|a| a.to_string()) }, Some("metering_account"), user_id.map(|u| u.to_string()).as_deref(), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        self.repo.find_account(&ctx.namespace, user_id, event_type).await?.ok_or_else(|| CoreError::not_found("metering account"))
    }

    pub async fn close_period(&self, ctx: &OperationContext, user_id: Option<Uuid>, event_type: &str) -> CoreResult<MeteringAccount> {
        ctx.validate()?;
        let existing = self.repo.find_account(&ctx.namespace, user_id, event_type).await?.ok_or_else(|| CoreError::not_found("metering account"))?;
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let account = self.repo.lock_or_create_account(&mut tx, &ctx.namespace, user_id, event_type, existing.resource.as_deref(), &existing.unit).await?;
        let period_start = account.period_start.ok_or_else(|| CoreError::not_found("open metering period"))?;

        let available = (account.balance - account.reserved).max(Decimal::ZERO);
        let carry = match account.carry_over_limit {
            Some(limit) => available.min(limit),
            None => available,
        };
        let expire = available - carry;

        if expire > Decimal::ZERO {
            let new_balance = account.balance - expire;
            self.repo
                .insert_ledger_entry(&mut tx, &ctx.namespace, user_id, event_type, account.resource.as_deref(), &account.unit, LedgerEntryType::Expiration, -expire, new_balance, None, None, ctx.actor_id.as_deref())
                .await?;
            self.repo.apply_delta(&mut tx, &ctx.namespace, user_id, event_type, -expire, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO).await?;
        }
        self.repo.set_period(&mut tx, &ctx.namespace, user_id, event_type, None, None, account.carry_over_limit).await?;

        audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::PeriodClosed { event_type: event_type.to_string(), period_start: period_start.to_rfc3339(), carried_over: carry.to_string() }, Some("metering_account"), user_id.map(|u| u.to_string()).as_deref(), None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        self.repo.find_account(&ctx.namespace, user_id, event_type).await?.ok_or_else(|| CoreError::not_found("metering account"))
    }

    /// Diffs each account against its ledger sum (I1) and its active
    /// reservation sum (I2); never mutates state.
    pub async fn reconcile(&self, ctx: &OperationContext) -> CoreResult<Vec<ReconcileDiscrepancy>> {
        ctx.validate()?;
        let accounts = self.repo.list_accounts(&ctx.namespace).await?;
        let mut discrepancies = Vec::new();

        for account in accounts {
            let ledger_sum = self.repo.sum_ledger_for_account(&ctx.namespace, account.user_id, &account.event_type).await?;
            if ledger_sum != account.balance {
                discrepancies.push(ReconcileDiscrepancy { namespace: ctx.namespace.clone(), user_id: account.user_id, event_type: account.event_type.clone(), kind: ReconcileDiscrepancyKind::BalanceMismatch, expected: ledger_sum, actual: account.balance });
            }

            if let Some(user_id) = account.user_id {
                let reserved_sum = self.repo.sum_active_reservations(&ctx.namespace, user_id, &account.event_type).await?;
                if reserved_sum != account.reserved {
                    discrepancies.push(ReconcileDiscrepancy { namespace: ctx.namespace.clone(), user_id: account.user_id, event_type: account.event_type.clone(), kind: ReconcileDiscrepancyKind::ReservedMismatch, expected: reserved_sum, actual: account.reserved });
                }
            }
        }

        if !discrepancies.is_empty() {
            let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
            for d in &discrepancies {
                let (kind, account_label) = match d.kind {
                    ReconcileDiscrepancyKind::BalanceMismatch => ("balance_mismatch", "balance"),
                    ReconcileDiscrepancyKind::ReservedMismatch => ("reserved_mismatch", "reserved"),
                };
                audit::record(&mut tx, AuditDomain::Meter, ctx, &MeterEvent::DiscrepancyDetected { event_type: d.event_type.clone(), kind, expected: d.expected.to_string(), actual: d.actual.to_string() }, Some("metering_account"), d.user_id.map(|u| u.to_string()).as_deref(), None, Some(serde_json::json!({ "field": account_label }))).await?;
            }
            tx.commit().await.map_err(CoreError::Database)?;
        }

        Ok(discrepancies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_outcome_reports_unavailable_balance() {
        let outcome = ConsumeOutcome { success: false, balance: Decimal::new(100, 0), available: Decimal::ZERO, entry: None };
        assert!(!outcome.success);
        assert_eq!(outcome.available, Decimal::ZERO);
    }
}
