//! # Service Layer
//!
//! The service layer holds the business logic of the identity and access
//! data plane. It orchestrates the repository layer (data access) and the
//! audit layer (compliance trail), and is the only layer API handlers call
//! into.
//!
//! ## Clean Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            API Layer                                    │
//! │                    (HTTP handlers, DTOs)                                │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 │ Calls service methods
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Service Layer                                  │
//! │  IdentityService · RefreshService · ImpersonationService                │
//! │  AuthzService · ConfigStoreService · MeteringService                    │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 │ One serializable transaction per call
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │         Repository Layer               │      Audit Layer              │
//! │          (sqlx / Postgres)             │  (partitioned event trail)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Service Responsibilities
//!
//! | Service               | Owns                                             |
//! |------------------------|--------------------------------------------------|
//! | `IdentityService`      | Users, sessions, one-time tokens, API keys, MFA  |
//! | `RefreshService`       | Refresh-token family rotation and reuse detection |
//! | `ImpersonationService` | Same-namespace and cross-namespace operator impersonation |
//! | `AuthzService`         | Relationship tuples, permission hierarchy, check/list/explain |
//! | `ConfigStoreService`   | Versioned config entries and schemas             |
//! | `MeteringService`      | Metering ledger, reservations, period close       |
//!
//! Every public method takes an [`crate::context::OperationContext`] and
//! runs inside one transaction, committing exactly one audit row per
//! successful mutation.

pub mod authz;
pub mod config_store;
pub mod identity;
pub mod impersonation;
pub mod metering;
pub mod refresh;

pub use authz::AuthzService;
pub use config_store::ConfigStoreService;
pub use identity::IdentityService;
pub use impersonation::ImpersonationService;
pub use metering::MeteringService;
pub use refresh::RefreshService;
