//! # PostgreSQL Connection Pool & Locking Helpers
//!
//! Database connection management using sqlx's async connection pool, plus
//! the advisory-lock helper every cycle-sensitive write path in
//! `dataplane-core` relies on.
//!
//! ## Sizing Guidelines
//!
//! Rule of thumb: `max_connections = (2 * cpu_cores) + disk_spindles`. Don't
//! set it too high — idle connections consume memory on both sides.
//!
//! ## Advisory Locking
//!
//! Cycle-sensitive writes (new `member`/`parent` edges) take a transaction
//! scoped advisory lock on both endpoints before reading the graph, so two
//! concurrent writers can't race each other into creating a cycle. Keys are
//! sorted before acquisition to avoid deadlocking against a second writer
//! locking the same two endpoints in the opposite order.

use crate::config::DatabaseConfig;
use crate::errors::CoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::info;

/// Creates a PostgreSQL connection pool.
///
/// Establishes the minimum connections and verifies connectivity. Call once
/// at process startup; `PgPool` is cheap to clone and share.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, CoreError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_seconds = config.connect_timeout_seconds,
        max_lifetime_seconds = config.max_lifetime_seconds,
        "creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create database pool");
            CoreError::Database(e)
        })?;

    info!("database connection pool created successfully");

    Ok(pool)
}

/// Verifies database connectivity by executing `SELECT 1`.
pub async fn health_check(pool: &PgPool) -> Result<(), CoreError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(CoreError::Database)?;
    Ok(())
}

/// Acquires two independent transaction-scoped advisory locks, one per graph
/// endpoint.
///
/// Endpoints are identified by an opaque string key (typically
/// `"{namespace}:{endpoint_type}:{endpoint_id}"`); each key is hashed with
/// Postgres's `hashtext()` and passed to its own `pg_advisory_xact_lock(bigint)`
/// call. This is deliberately *not* the two-argument `pg_advisory_xact_lock(int4,
/// int4)` overload — that form locks on the composite `(key1, key2)` pair, so
/// two writes sharing only one endpoint (e.g. `(A, B)` and `(A, C)`) would
/// hash to different composite keys and never contend. Issuing two
/// single-key locks means any writer touching endpoint `A` serializes
/// against any other writer touching `A`, regardless of what the other
/// endpoint is. Callers must sort `key_a`/`key_b` lexicographically *before*
/// calling this function so two writers locking the same pair always
/// acquire in the same order — the locks are released automatically when
/// the transaction commits or rolls back.
pub async fn advisory_xact_lock_pair(
    tx: &mut Transaction<'_, Postgres>,
    key_a: &str,
    key_b: &str,
) -> Result<(), CoreError> {
    debug_assert!(key_a <= key_b, "advisory lock keys must be sorted before acquisition");

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
        .bind(key_a)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
        .bind(key_b)
        .execute(&mut **tx)
        .await
        .map_err(CoreError::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // Database tests require a live Postgres instance. They are marked
    // #[ignore] and exercised in CI with `--ignored` against a throwaway
    // database; see the crate-level test harness for setup.
}
