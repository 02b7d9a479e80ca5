//! # Authorization Graph Entities
//!
//! A relationship tuple is one labelled edge between a resource and a
//! subject. Two relation names are reserved: `member` (group membership,
//! possibly group-of-groups) and `parent` (resource containment); every
//! other relation name is a user-defined permission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const RESERVED_RELATION_MEMBER: &str = "member";
pub const RESERVED_RELATION_PARENT: &str = "parent";

/// A `(resource_type, resource_id)` or `(subject_type, subject_id)`
/// endpoint. Both sides of a tuple, and every node in the traversal
/// closures, are identified this way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub kind: String,
    pub id: String,
}

impl Endpoint {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: id.into() }
    }

    /// Canonical string form used as an advisory-lock key and for sorting
    /// endpoint pairs before acquisition.
    pub fn lock_key(&self, namespace: &str) -> String {
        format!("{namespace}:{}:{}", self.kind, self.id)
    }
}

/// One relationship-tuple edge.
#[derive(Debug, Clone, FromRow)]
pub struct RelationshipTuple {
    pub id: Uuid,
    pub namespace: String,
    pub resource_type: String,
    pub resource_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RelationshipTuple {
    pub fn resource(&self) -> Endpoint {
        Endpoint::new(self.resource_type.clone(), self.resource_id.clone())
    }

    pub fn subject(&self) -> Endpoint {
        Endpoint::new(self.subject_type.clone(), self.subject_id.clone())
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// A permission-implication rule: holding `implies` on a resource of
/// `resource_type` is sufficient to also hold `permission`.
#[derive(Debug, Clone, FromRow)]
pub struct PermissionHierarchyRule {
    pub namespace: String,
    pub resource_type: String,
    pub permission: String,
    pub implies: String,
}

/// One membership edge produced by [`crate::service::authz::hierarchy::expand_subject_memberships`]:
/// the subject reaches `group` via zero or more `member` edges, the last of
/// which carried `edge_relation`.
#[derive(Debug, Clone)]
pub struct MembershipEdge {
    pub group: Endpoint,
    pub edge_relation: Option<String>,
}

/// The kind of path [`crate::service::authz::engine::explain`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainPathType {
    Direct,
    Group,
    Hierarchy,
    Resource,
}

/// One path witnessing a `check` decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainPath {
    pub path_type: ExplainPathType,
    pub via_relation: String,
    pub via_subject_type: Option<String>,
    pub via_subject_id: Option<String>,
    pub via_membership: Option<String>,
    pub chain: Vec<String>,
}

impl ExplainPath {
    /// Renders a human-readable sentence for this path.
    pub fn explain_text(&self) -> String {
        match self.path_type {
            ExplainPathType::Direct => format!("granted directly via relation '{}'", self.via_relation),
            ExplainPathType::Group => format!(
                "granted via group membership chain [{}] holding relation '{}'",
                self.chain.join(" -> "),
                self.via_relation
            ),
            ExplainPathType::Hierarchy => format!(
                "granted via permission hierarchy [{}] rooted at relation '{}'",
                self.chain.join(" -> "),
                self.via_relation
            ),
            ExplainPathType::Resource => format!(
                "granted via resource ancestor chain [{}] holding relation '{}'",
                self.chain.join(" -> "),
                self.via_relation
            ),
        }
    }
}
