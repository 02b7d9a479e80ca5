//! # Repository Layer
//!
//! Thin data-access structs, one per aggregate. Each wraps a `PgPool` clone
//! (cheap, `Arc`-backed) and exposes query methods that return domain types
//! or [`shared::errors::CoreError`]. Business rules, transaction boundaries
//! spanning more than one repository, and audit emission all live one layer
//! up in [`crate::service`].
//!
//! Every method that mutates state and needs to share a transaction with an
//! audit write takes `&mut Transaction<'_, Postgres>` instead of using its
//! own pool; read-only lookups take `&PgPool` directly for simplicity.

pub mod config;
pub mod identity;
pub mod impersonation;
pub mod metering;
pub mod refresh;
pub mod tuple;

pub use config::ConfigRepository;
pub use identity::IdentityRepository;
pub use impersonation::ImpersonationRepository;
pub use metering::MeteringRepository;
pub use refresh::RefreshRepository;
pub use tuple::TupleRepository;
