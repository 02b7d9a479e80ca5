//! # Audit Log
//!
//! Append-only, monthly-partitioned audit storage. Each domain (authn,
//! authz, config, operator, meter) owns its own parent table; children are
//! named `<parent>_yYYYYmMM` and created ahead of time by
//! [`ensure_partitions`]. Partition creation/retention are plain async
//! functions over a pool, not a scheduled job — a caller's cron (or
//! equivalent) is expected to invoke them periodically.
//!
//! Every mutating public service function emits exactly one audit event
//! inside the same transaction as its mutation, via [`record`]. Sensitive
//! fields (password hashes, token hashes, key hashes, MFA secrets) must
//! never be passed into an event's `details` payload.

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value as Json;
use shared::errors::CoreResult;
use sqlx::{PgPool, Postgres, Transaction};

use crate::context::OperationContext;

/// The five audit domains named by the operation contract, each backed by
/// its own partitioned parent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDomain {
    Authn,
    Authz,
    Config,
    Operator,
    Meter,
}

impl AuditDomain {
    /// Name of this domain's parent table.
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Authn => "audit_authn",
            Self::Authz => "audit_authz",
            Self::Config => "audit_config",
            Self::Operator => "audit_operator",
            Self::Meter => "audit_meter",
        }
    }
}

/// One domain's audit-event payload. Implementors name the event type and
/// provide a JSON `details` blob; the envelope fields (namespace, actor
/// context, resource, timestamp) are supplied by [`record`] from the active
/// [`OperationContext`].
pub trait AuditEvent {
    /// Stable event-type string, e.g. `"refresh_token_rotated"`.
    fn event_type(&self) -> &'static str;
    /// Structured event-specific payload. Must never contain a secret
    /// field (password/token/key hash, MFA secret).
    fn details(&self) -> Json;
}

/// Inserts one audit row into `domain`'s parent table inside the caller's
/// transaction. Postgres routes the row to the correct monthly child via
/// declarative partitioning on `occurred_at`.
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    domain: AuditDomain,
    ctx: &OperationContext,
    event: &dyn AuditEvent,
    resource_type: Option<&str>,
    resource_id: Option<&str>,
    old_value: Option<Json>,
    new_value: Option<Json>,
) -> CoreResult<()> {
    let sql = format!(
        r#"
        INSERT INTO {table} (
            event_type, namespace, actor_id, request_id, ip_address, user_agent,
            on_behalf_of, resource_type, resource_id, old_value, new_value, details, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
        "#,
        table = domain.table_name()
    );

    sqlx::query(&sql)
        .bind(event.event_type())
        .bind(&ctx.namespace)
        .bind(&ctx.actor_id)
        .bind(&ctx.request_id)
        .bind(&ctx.ip_address)
        .bind(&ctx.user_agent)
        .bind(&ctx.on_behalf_of)
        .bind(resource_type)
        .bind(resource_id)
        .bind(old_value)
        .bind(new_value)
        .bind(event.details())
        .execute(&mut **tx)
        .await
        .map_err(shared::errors::CoreError::Database)?;

    Ok(())
}

/// Formats the literal partition-name suffix for a given year/month, e.g.
/// `y2026m08`.
pub fn partition_suffix(year: i32, month: u32) -> String {
    format!("y{year:04}m{month:02}")
}

/// Parses a partition-name suffix, refusing anything that does not match
/// the literal shape `yDDDDmDD`.
pub fn parse_partition_suffix(suffix: &str) -> Option<(i32, u32)> {
    let bytes = suffix.as_bytes();
    if bytes.len() != 8 || bytes[0] != b'y' || bytes[5] != b'm' {
        return None;
    }
    let year: i32 = suffix.get(1..5)?.parse().ok()?;
    let month: u32 = suffix.get(6..8)?.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

/// Idempotently creates the monthly partition for `domain` covering
/// `year`/`month`.
pub async fn create_partition(pool: &PgPool, domain: AuditDomain, year: i32, month: u32) -> CoreResult<()> {
    let parent = domain.table_name();
    let suffix = partition_suffix(year, month);
    let child = format!("{parent}_{suffix}");

    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let range_start = format!("{year:04}-{month:02}-01");
    let range_end = format!("{next_year:04}-{next_month:02}-01");

    let sql = format!(
        r#"CREATE TABLE IF NOT EXISTS {child}
            PARTITION OF {parent}
            FOR VALUES FROM ('{range_start}') TO ('{range_end}')"#
    );

    sqlx::query(&sql).execute(pool).await.map_err(shared::errors::CoreError::Database)?;
    Ok(())
}

/// Creates the partitions for every domain covering the current month
/// through `months_ahead` months into the future.
pub async fn ensure_partitions(pool: &PgPool, now: DateTime<Utc>, months_ahead: u32) -> CoreResult<()> {
    let domains =
        [AuditDomain::Authn, AuditDomain::Authz, AuditDomain::Config, AuditDomain::Operator, AuditDomain::Meter];

    for domain in domains {
        let mut year = now.year();
        let mut month = now.month();
        for _ in 0..=months_ahead {
            create_partition(pool, domain, year, month).await?;
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
    }
    Ok(())
}

/// Drops partitions older than `older_than_months` months before `now`, for
/// every domain. Default retention per the operation contract is 84 months.
/// Malformed partition names are logged and skipped rather than aborting
/// the sweep.
pub async fn drop_partitions(pool: &PgPool, now: DateTime<Utc>, older_than_months: u32) -> CoreResult<u64> {
    let cutoff_total_months = now.year() as i64 * 12 + now.month() as i64 - older_than_months as i64;
    let domains =
        [AuditDomain::Authn, AuditDomain::Authz, AuditDomain::Config, AuditDomain::Operator, AuditDomain::Meter];

    let mut dropped = 0u64;
    for domain in domains {
        let parent = domain.table_name();
        let like_pattern = format!("{parent}_y%m%");
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT relname FROM pg_class WHERE relname LIKE $1 AND relkind = 'r'")
                .bind(&like_pattern)
                .fetch_all(pool)
                .await
                .map_err(shared::errors::CoreError::Database)?;

        for (table_name,) in rows {
            let Some(suffix) = table_name.strip_prefix(&format!("{parent}_")) else { continue };
            let Some((year, month)) = parse_partition_suffix(suffix) else {
                tracing::warn!(table = %table_name, "skipping partition with unparseable name");
                continue;
            };
            let total_months = year as i64 * 12 + month as i64;
            if total_months < cutoff_total_months {
                let sql = format!("DROP TABLE IF EXISTS {table_name}");
                sqlx::query(&sql).execute(pool).await.map_err(shared::errors::CoreError::Database)?;
                dropped += 1;
            }
        }
    }

    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_suffix_matches_literal_shape() {
        assert_eq!(partition_suffix(2026, 8), "y2026m08");
        assert_eq!(partition_suffix(2026, 12), "y2026m12");
    }

    #[test]
    fn parse_accepts_well_formed_suffixes() {
        assert_eq!(parse_partition_suffix("y2026m08"), Some((2026, 8)));
        assert_eq!(parse_partition_suffix("y0001m01"), Some((1, 1)));
    }

    #[test]
    fn parse_rejects_malformed_suffixes() {
        assert_eq!(parse_partition_suffix("y2026m13"), None);
        assert_eq!(parse_partition_suffix("y2026m00"), None);
        assert_eq!(parse_partition_suffix("2026m08"), None);
        assert_eq!(parse_partition_suffix("y2026-08"), None);
        assert_eq!(parse_partition_suffix("y2026m8"), None);
        assert_eq!(parse_partition_suffix(""), None);
    }

    #[test]
    fn domain_table_names_are_stable() {
        assert_eq!(AuditDomain::Authn.table_name(), "audit_authn");
        assert_eq!(AuditDomain::Meter.table_name(), "audit_meter");
    }
}
