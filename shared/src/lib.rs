//! # Data Plane Shared Library
//!
//! Ambient infrastructure shared by the identity and access data plane crate:
//! configuration, error taxonomy, database pooling, structured logging and
//! request validation. None of this is domain logic — it is the scaffolding
//! every module in `dataplane-core` builds on.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`DataPlaneConfig`] |
//! | [`errors`] | Standardized error handling | [`CoreError`], [`CoreResult`] |
//! | [`database`] | PostgreSQL connection pool + locking | [`database::create_pool`] |
//! | [`tracing_config`] | Structured logging setup | [`tracing_config::init_tracing`] |
//! | [`validation`] | Validation helpers shared by every component | Custom validators |
//!
//! ## Design Decisions
//!
//! 1. Single source of truth: every crate in this workspace pulls config,
//!    errors and pooling from here instead of rolling its own.
//! 2. No HTTP framework dependency: this crate has no opinion about how
//!    callers expose the data plane, so it never depends on actix-web or axum.
//! 3. Observable by default: structured logging is wired in from the start.

pub mod config;
pub mod database;
pub mod errors;
pub mod tracing_config;
pub mod validation;

pub use config::DataPlaneConfig;
pub use errors::{CoreError, CoreResult};
