//! # Versioned Config Store Entities
//!
//! At most one version per `(namespace, key)` is active at a time. The
//! monotonic per-key version counter persists in `version_counters` even
//! across deletes, so version numbers are never reused.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ConfigEntry {
    pub id: Uuid,
    pub namespace: String,
    pub key: String,
    pub version: i32,
    pub value: Json,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// A schema bound to a key-prefix pattern. Matching tries an exact key
/// match first, then the longest matching prefix ending in `/`, then falls
/// through to "no schema".
#[derive(Debug, Clone, FromRow)]
pub struct ConfigSchema {
    pub key_pattern: String,
    pub schema: Json,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pluggable validator for config values against a schema. The crate never
/// bundles a JSON-Schema engine; callers supply one through this trait.
pub trait ConfigSchemaValidator: Send + Sync {
    fn validate(&self, schema: &Json, value: &Json) -> Result<(), String>;
}
