//! # Tracing and Structured Logging Configuration
//!
//! Initializes the logging system with environment-appropriate settings.
//!
//! | Environment | Format | Purpose |
//! |-------------|--------|---------|
//! | Development | Pretty | Human-readable, colored output |
//! | Production | JSON | Machine-parseable for log aggregation |
//!
//! ## Filter Configuration
//!
//! Control verbosity via the `RUST_LOG` environment variable:
//!
//! ```bash
//! RUST_LOG=debug
//! RUST_LOG=info,dataplane_core=debug
//! RUST_LOG=info,sqlx=warn
//! ```
//!
//! ## Secrets
//!
//! Never log password hashes, token hashes, key hashes or MFA secrets.
//! Every mutating operation in `dataplane_core` logs the entity id touched
//! and the acting namespace/actor, never the secret fields themselves.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initializes the tracing/logging system.
///
/// Call once at process startup, before any other code emits logs.
///
/// If `RUST_LOG` is unset: production defaults to `info`; development
/// defaults to `debug,hyper=info,sqlx=warn`.
pub fn init_tracing(service_name: &str, is_production: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("debug,hyper=info,sqlx=warn")
        }
    });

    if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }

    tracing::info!(service = service_name, production = is_production, "tracing initialized");
}

/// Creates a span for tracking one call into the data plane.
///
/// ```rust,ignore
/// use shared::operation_span;
///
/// async fn check(ctx: &OperationContext) -> CoreResult<bool> {
///     let span = operation_span!(ctx.request_id.as_deref().unwrap_or("-"), "authz.check");
///     async { /* ... */ }.instrument(span).await
/// }
/// ```
#[macro_export]
macro_rules! operation_span {
    ($request_id:expr, $operation:expr) => {
        tracing::info_span!(
            "operation",
            request_id = %$request_id,
            operation = %$operation,
        )
    };
}

/// Logs an error with context, for consistent error-logging format.
pub fn log_error<E: std::fmt::Display>(error: &E, context: &str) {
    tracing::error!(error = %error, context = context, "error occurred");
}

/// Logs a warning with context, for recoverable issues worth monitoring.
pub fn log_warning(message: &str, context: &str) {
    tracing::warn!(message = message, context = context, "warning");
}
