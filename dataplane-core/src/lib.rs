//! # Identity & Access Data Plane
//!
//! The transactional store behind authentication state, a relationship-tuple
//! authorization graph, versioned configuration and a metering ledger for a
//! multi-tenant platform.
//!
//! ## What this crate is not
//!
//! It never binds a socket, never hashes a password, never verifies a TOTP
//! code and never sends an email. Callers own cryptography and transport;
//! this crate owns the transactional state those operations manipulate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`context`] | The explicit [`context::OperationContext`] threaded through every call |
//! | [`audit`] | Partitioned audit-log storage and the [`audit::AuditEvent`] trait |
//! | [`domain`] | Entities mapping directly to the persisted tables |
//! | [`repository`] | sqlx data-access layer, one module per table family |
//! | [`service`] | Business logic: identity, refresh-token rotation, impersonation, the authorization engine, config store, metering |

pub mod audit;
pub mod context;
pub mod domain;
pub mod repository;
pub mod service;

pub use context::OperationContext;
