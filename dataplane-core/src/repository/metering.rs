//! # Metering Ledger Repository
//!
//! `balance`/`reserved` on `metering_accounts` are denormalized running
//! totals kept consistent with `ledger_entries`/`reservations` by every
//! service-layer call executing inside one transaction: lock the account
//! row, write the ledger entry, update the running total. [`reconcile`]
//! independently recomputes both totals from the ledger and reservations to
//! catch drift.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::errors::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::metering::{LedgerEntry, LedgerEntryType, MeteringAccount, Reservation, ReservationStatus};

#[derive(Debug, Clone)]
pub struct MeteringRepository {
    pool: PgPool,
}

impl MeteringRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Locks (creating with zero balances if absent) the account row for
    /// `(namespace, user_id, event_type)` inside `tx`.
    pub async fn lock_or_create_account(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Option<Uuid>,
        event_type: &str,
        resource: Option<&str>,
        unit: &str,
    ) -> CoreResult<MeteringAccount> {
        sqlx::query_as::<_, MeteringAccount>(
            r#"
            INSERT INTO metering_accounts (namespace, user_id, event_type, resource, unit)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (namespace, event_type, (COALESCE(user_id, '00000000-0000-0000-0000-000000000000'::uuid)))
            DO UPDATE SET updated_at = metering_accounts.updated_at
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(event_type)
        .bind(resource)
        .bind(unit)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

        sqlx::query_as::<_, MeteringAccount>(
            r#"
            SELECT * FROM metering_accounts
            WHERE namespace = $1 AND event_type = $2
              AND ((user_id IS NULL AND $3::uuid IS NULL) OR user_id = $3)
            FOR UPDATE
            "#,
        )
        .bind(namespace)
        .bind(event_type)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_account(&self, namespace: &str, user_id: Option<Uuid>, event_type: &str) -> CoreResult<Option<MeteringAccount>> {
        sqlx::query_as::<_, MeteringAccount>(
            r#"
            SELECT * FROM metering_accounts
            WHERE namespace = $1 AND event_type = $2
              AND ((user_id IS NULL AND $3::uuid IS NULL) OR user_id = $3)
            "#,
        )
        .bind(namespace)
        .bind(event_type)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn apply_delta(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Option<Uuid>,
        event_type: &str,
        balance_delta: Decimal,
        reserved_delta: Decimal,
        credited_delta: Decimal,
        debited_delta: Decimal,
    ) -> CoreResult<MeteringAccount> {
        sqlx::query_as::<_, MeteringAccount>(
            r#"
            UPDATE metering_accounts
            SET balance = balance + $4,
                reserved = reserved + $5,
                total_credited = total_credited + $6,
                total_debited = total_debited + $7,
                updated_at = now()
            WHERE namespace = $1 AND event_type = $2
              AND ((user_id IS NULL AND $3::uuid IS NULL) OR user_id = $3)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(event_type)
        .bind(user_id)
        .bind(balance_delta)
        .bind(reserved_delta)
        .bind(credited_delta)
        .bind(debited_delta)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn set_period(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Option<Uuid>,
        event_type: &str,
        period_start: Option<DateTime<Utc>>,
        period_allocation: Option<Decimal>,
        carry_over_limit: Option<Decimal>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE metering_accounts
            SET period_start = $4, period_allocation = $5, carry_over_limit = $6, updated_at = now()
            WHERE namespace = $1 AND event_type = $2
              AND ((user_id IS NULL AND $3::uuid IS NULL) OR user_id = $3)
            "#,
        )
        .bind(namespace)
        .bind(event_type)
        .bind(user_id)
        .bind(period_start)
        .bind(period_allocation)
        .bind(carry_over_limit)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn insert_ledger_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Option<Uuid>,
        event_type: &str,
        resource: Option<&str>,
        unit: &str,
        entry_type: LedgerEntryType,
        amount: Decimal,
        balance_after: Decimal,
        idempotency_key: Option<&str>,
        reservation_id: Option<Uuid>,
        actor_id: Option<&str>,
    ) -> CoreResult<LedgerEntry> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO ledger_entries
                (namespace, user_id, event_type, resource, unit, entry_type, amount, balance_after,
                 idempotency_key, reservation_id, actor_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(event_type)
        .bind(resource)
        .bind(unit)
        .bind(entry_type)
        .bind(amount)
        .bind(balance_after)
        .bind(idempotency_key)
        .bind(reservation_id)
        .bind(actor_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("ledger_entries_namespace_idempotency_key_key") {
                    return CoreError::Conflict { resource: "idempotency key".into() };
                }
            }
            CoreError::Database(e)
        })
    }

    pub async fn find_by_idempotency_key(&self, namespace: &str, idempotency_key: &str) -> CoreResult<Option<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE namespace = $1 AND idempotency_key = $2",
        )
        .bind(namespace)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn sum_ledger_for_account(&self, namespace: &str, user_id: Option<Uuid>, event_type: &str) -> CoreResult<Decimal> {
        let row: (Option<Decimal>,) = sqlx::query_as(
            r#"
            SELECT SUM(amount) FROM ledger_entries
            WHERE namespace = $1 AND event_type = $2
              AND ((user_id IS NULL AND $3::uuid IS NULL) OR user_id = $3)
            "#,
        )
        .bind(namespace)
        .bind(event_type)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(row.0.unwrap_or_default())
    }

    // -- reservations -----------------------------------------------------

    pub async fn insert_reservation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        user_id: Uuid,
        event_type: &str,
        resource: Option<&str>,
        unit: &str,
        amount: Decimal,
        expires_at: DateTime<Utc>,
        idempotency_key: Option<&str>,
    ) -> CoreResult<Reservation> {
        sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations
                (namespace, user_id, event_type, resource, unit, amount, expires_at, status, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8)
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(event_type)
        .bind(resource)
        .bind(unit)
        .bind(amount)
        .bind(expires_at)
        .bind(idempotency_key)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn find_reservation_by_idempotency_key(&self, namespace: &str, idempotency_key: &str) -> CoreResult<Option<Reservation>> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE namespace = $1 AND idempotency_key = $2",
        )
        .bind(namespace)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn lock_reservation(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, reservation_id: Uuid) -> CoreResult<Option<Reservation>> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE namespace = $1 AND reservation_id = $2 FOR UPDATE",
        )
        .bind(namespace)
        .bind(reservation_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn mark_committed(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        reservation_id: Uuid,
        actual_amount: Decimal,
        consumption_entry_id: Uuid,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'committed', actual_amount = $3, consumption_entry_id = $4
            WHERE namespace = $1 AND reservation_id = $2
            "#,
        )
        .bind(namespace)
        .bind(reservation_id)
        .bind(actual_amount)
        .bind(consumption_entry_id)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn mark_released(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, reservation_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE reservations SET status = 'released' WHERE namespace = $1 AND reservation_id = $2")
            .bind(namespace)
            .bind(reservation_id)
            .execute(&mut **tx)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn find_expired_active(&self, namespace: &str, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE namespace = $1 AND status = 'active' AND expires_at <= $2",
        )
        .bind(namespace)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Locks one expired reservation for the sweep, skipping rows already
    /// locked by a concurrent sweeper instead of blocking on them.
    pub async fn lock_expired_active(&self, tx: &mut Transaction<'_, Postgres>, namespace: &str, reservation_id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<Reservation>> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE namespace = $1 AND reservation_id = $2 AND status = 'active' AND expires_at <= $3 FOR UPDATE SKIP LOCKED",
        )
        .bind(namespace)
        .bind(reservation_id)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn sum_active_reservations(&self, namespace: &str, user_id: Uuid, event_type: &str) -> CoreResult<Decimal> {
        let row: (Option<Decimal>,) = sqlx::query_as(
            r#"
            SELECT SUM(amount) FROM reservations
            WHERE namespace = $1 AND user_id = $2 AND event_type = $3 AND status = $4
            "#,
        )
        .bind(namespace)
        .bind(user_id)
        .bind(event_type)
        .bind(ReservationStatus::Active)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(row.0.unwrap_or_default())
    }

    pub async fn list_accounts(&self, namespace: &str) -> CoreResult<Vec<MeteringAccount>> {
        sqlx::query_as::<_, MeteringAccount>("SELECT * FROM metering_accounts WHERE namespace = $1")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::Database)
    }
}
