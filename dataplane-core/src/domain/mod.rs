//! # Domain Layer
//!
//! Domain entities map directly onto the persisted tables and carry no
//! behaviour beyond `FromRow`/`Serialize` plumbing; business logic lives in
//! [`crate::service`]. Domain events implement [`crate::audit::AuditEvent`]
//! and are emitted by service functions inside the same transaction as
//! their mutation.
//!
//! ## Module Structure
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `identity` | Users, sessions, one-time tokens, API keys, MFA, login attempts |
//! | `refresh` | Refresh-token family entity |
//! | `impersonation` | Regular and cross-namespace operator impersonation records |
//! | `authz` | Relationship tuples, permission-hierarchy rules, explain paths |
//! | `config_entry` | Versioned config entries and schemas |
//! | `metering` | Metering accounts, ledger entries, reservations |
//! | `events` | Audit-event payloads for every domain |

pub mod authz;
pub mod config_entry;
pub mod events;
pub mod identity;
pub mod impersonation;
pub mod metering;
pub mod refresh;

pub use authz::{PermissionHierarchyRule, RelationshipTuple};
pub use config_entry::{ConfigEntry, ConfigSchema};
pub use identity::{ApiKey, LoginAttempt, MfaEnrolment, OneTimeToken, Session, User};
pub use impersonation::{ImpersonationSession, OperatorImpersonationSession};
pub use metering::{LedgerEntry, MeteringAccount, Reservation};
pub use refresh::RefreshToken;
