//! # Relationship Tuple Repository
//!
//! `write_tuple`'s cycle check (see [`crate::service::authz::tuples`]) needs
//! to read the graph and insert the new edge under the same advisory lock,
//! so every mutating method here takes a transaction; only the read paths
//! used by the check engine take a bare pool.

use chrono::{DateTime, Utc};
use shared::errors::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::authz::{PermissionHierarchyRule, RelationshipTuple};

#[derive(Debug, Clone)]
pub struct TupleRepository {
    pool: PgPool,
}

impl TupleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &str,
        resource_type: &str,
        resource_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
        subject_relation: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<RelationshipTuple> {
        sqlx::query_as::<_, RelationshipTuple>(
            r#"
            INSERT INTO relationship_tuples
                (namespace, resource_type, resource_id, relation, subject_type, subject_id, subject_relation, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (namespace, resource_type, resource_id, relation, subject_type, subject_id)
            DO UPDATE SET subject_relation = EXCLUDED.subject_relation, expires_at = EXCLUDED.expires_at
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(resource_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .bind(subject_relation)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn delete(
        &self,
        namespace: &str,
        resource_type: &str,
        resource_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> CoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM relationship_tuples
            WHERE namespace = $1 AND resource_type = $2 AND resource_id = $3
              AND relation = $4 AND subject_type = $5 AND subject_id = $6
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(resource_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }

    /// Tuples where `(subject_type, subject_id)` is the subject and
    /// `relation = member` — outgoing group-membership edges.
    pub async fn outgoing_member_edges(&self, namespace: &str, subject_type: &str, subject_id: &str) -> CoreResult<Vec<RelationshipTuple>> {
        sqlx::query_as::<_, RelationshipTuple>(
            r#"
            SELECT * FROM relationship_tuples
            WHERE namespace = $1 AND relation = 'member' AND subject_type = $2 AND subject_id = $3
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace)
        .bind(subject_type)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Tuples where `(resource_type, resource_id)` is the resource and
    /// `relation = parent` — outgoing resource-containment edges.
    pub async fn outgoing_parent_edges(&self, namespace: &str, resource_type: &str, resource_id: &str) -> CoreResult<Vec<RelationshipTuple>> {
        sqlx::query_as::<_, RelationshipTuple>(
            r#"
            SELECT * FROM relationship_tuples
            WHERE namespace = $1 AND relation = 'parent' AND resource_type = $2 AND resource_id = $3
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Tuples where `(resource_type, resource_id)` is the parent side of a
    /// `parent` edge — children of a resource, used by `list_resources`.
    pub async fn incoming_parent_edges(&self, namespace: &str, resource_type: &str, resource_id: &str) -> CoreResult<Vec<RelationshipTuple>> {
        sqlx::query_as::<_, RelationshipTuple>(
            r#"
            SELECT * FROM relationship_tuples
            WHERE namespace = $1 AND relation = 'parent' AND subject_type = $2 AND subject_id = $3
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Direct grants of `relation` on `(resource_type, resource_id)`, any
    /// subject.
    pub async fn direct_grants(&self, namespace: &str, resource_type: &str, resource_id: &str, relation: &str) -> CoreResult<Vec<RelationshipTuple>> {
        sqlx::query_as::<_, RelationshipTuple>(
            r#"
            SELECT * FROM relationship_tuples
            WHERE namespace = $1 AND resource_type = $2 AND resource_id = $3 AND relation = $4
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(resource_id)
        .bind(relation)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Resources of `resource_type` where `(subject_type, subject_id)` holds
    /// `relation` directly — seed set for `list_resources`.
    pub async fn direct_resources_for_subject(
        &self,
        namespace: &str,
        resource_type: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> CoreResult<Vec<RelationshipTuple>> {
        sqlx::query_as::<_, RelationshipTuple>(
            r#"
            SELECT * FROM relationship_tuples
            WHERE namespace = $1 AND resource_type = $2 AND relation = $3 AND subject_type = $4 AND subject_id = $5
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn delete_expired(&self, namespace: &str) -> CoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM relationship_tuples WHERE namespace = $1 AND expires_at IS NOT NULL AND expires_at <= now()",
        )
        .bind(namespace)
        .execute(&self.pool)
        .await
        .map_err(CoreError::Database)?;
        Ok(result.rows_affected())
    }

    // -- permission hierarchy ------------------------------------------------

    pub async fn upsert_hierarchy_rule(&self, namespace: &str, resource_type: &str, permission: &str, implies: &str) -> CoreResult<PermissionHierarchyRule> {
        sqlx::query_as::<_, PermissionHierarchyRule>(
            r#"
            INSERT INTO permission_hierarchy_rules (namespace, resource_type, permission, implies)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace, resource_type, permission, implies) DO UPDATE SET implies = EXCLUDED.implies
            RETURNING *
            "#,
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(permission)
        .bind(implies)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    pub async fn hierarchy_rules_for(&self, namespace: &str, resource_type: &str, permission: &str) -> CoreResult<Vec<PermissionHierarchyRule>> {
        sqlx::query_as::<_, PermissionHierarchyRule>(
            "SELECT * FROM permission_hierarchy_rules WHERE namespace = $1 AND resource_type = $2 AND permission = $3",
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(permission)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }

    /// Rules whose `implies` column equals `implies` — i.e. every
    /// `permission` that is sufficient to also grant `implies`.
    pub async fn hierarchy_rules_implying(&self, namespace: &str, resource_type: &str, implies: &str) -> CoreResult<Vec<PermissionHierarchyRule>> {
        sqlx::query_as::<_, PermissionHierarchyRule>(
            "SELECT * FROM permission_hierarchy_rules WHERE namespace = $1 AND resource_type = $2 AND implies = $3",
        )
        .bind(namespace)
        .bind(resource_type)
        .bind(implies)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::Database)
    }
}
