//! # Authorization Graph Service
//!
//! Thin facade over [`hierarchy`], [`tuples`] (the write protocol) and
//! [`engine`] (the read-side check/list/explain algorithms), all sharing one
//! [`TupleRepository`].

pub mod engine;
pub mod hierarchy;
pub mod tuples;

use chrono::{DateTime, Utc};
use shared::errors::CoreResult;
use sqlx::PgPool;

use crate::context::OperationContext;
use crate::domain::authz::{Endpoint, ExplainPath, PermissionHierarchyRule, RelationshipTuple};
use crate::repository::TupleRepository;

#[derive(Debug, Clone)]
pub struct AuthzService {
    pool: PgPool,
    repo: TupleRepository,
    max_group_depth: u32,
    max_resource_depth: u32,
}

impl AuthzService {
    pub fn new(pool: PgPool, max_group_depth: u32, max_resource_depth: u32) -> Self {
        let repo = TupleRepository::new(pool.clone());
        Self { pool, repo, max_group_depth, max_resource_depth }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write_tuple(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        resource_id: &str,
        relation: &str,
        subject_type: &str,
        subject_id: &str,
        subject_relation: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<RelationshipTuple> {
        let depth = if relation == crate::domain::authz::RESERVED_RELATION_PARENT { self.max_resource_depth } else { self.max_group_depth };
        tuples::write_tuple(&self.pool, &self.repo, ctx, resource_type, resource_id, relation, subject_type, subject_id, subject_relation, expires_at, depth).await
    }

    pub async fn delete_tuple(&self, ctx: &OperationContext, resource_type: &str, resource_id: &str, relation: &str, subject_type: &str, subject_id: &str) -> CoreResult<bool> {
        tuples::delete_tuple(&self.pool, &self.repo, ctx, resource_type, resource_id, relation, subject_type, subject_id).await
    }

    pub async fn cleanup_expired(&self, ctx: &OperationContext) -> CoreResult<u64> {
        tuples::cleanup_expired(&self.pool, &self.repo, ctx).await
    }

    pub async fn write_hierarchy_rule(&self, ctx: &OperationContext, resource_type: &str, permission: &str, implies: &str) -> CoreResult<PermissionHierarchyRule> {
        ctx.validate()?;
        let mut tx = self.pool.begin().await.map_err(shared::errors::CoreError::Database)?;
        let rule = self.repo.upsert_hierarchy_rule(&ctx.namespace, resource_type, permission, implies).await?;
        crate::audit::record(
            &mut tx,
            crate::audit::AuditDomain::Authz,
            ctx,
            &crate::domain::events::AuthzEvent::HierarchyRuleWritten { resource_type: resource_type.to_string(), permission: permission.to_string(), implies: implies.to_string() },
            Some(resource_type),
            None,
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(shared::errors::CoreError::Database)?;
        Ok(rule)
    }

    pub async fn check(&self, namespace: &str, subject: &Endpoint, permission: &str, resource: &Endpoint, resource_type: &str) -> CoreResult<bool> {
        engine::check(&self.repo, namespace, subject, permission, resource, resource_type, self.max_group_depth.max(self.max_resource_depth)).await
    }

    pub async fn check_any(&self, namespace: &str, subject: &Endpoint, permissions: &[String], resource: &Endpoint, resource_type: &str) -> CoreResult<bool> {
        engine::check_any(&self.repo, namespace, subject, permissions, resource, resource_type, self.max_group_depth.max(self.max_resource_depth)).await
    }

    pub async fn check_all(&self, namespace: &str, subject: &Endpoint, permissions: &[String], resource: &Endpoint, resource_type: &str) -> CoreResult<bool> {
        engine::check_all(&self.repo, namespace, subject, permissions, resource, resource_type, self.max_group_depth.max(self.max_resource_depth)).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn list_resources(&self, namespace: &str, subject: &Endpoint, resource_type: &str, permission: &str, limit: usize, cursor: Option<&str>) -> CoreResult<Vec<String>> {
        engine::list_resources(&self.repo, namespace, subject, resource_type, permission, limit, cursor, self.max_resource_depth).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn list_subjects(&self, namespace: &str, resource: &Endpoint, resource_type: &str, permission: &str, limit: usize, cursor: Option<&Endpoint>) -> CoreResult<Vec<Endpoint>> {
        engine::list_subjects(&self.repo, namespace, resource, resource_type, permission, limit, cursor, self.max_group_depth).await
    }

    pub async fn filter_authorized(&self, namespace: &str, subject: &Endpoint, resource_type: &str, permission: &str, ids: &[String]) -> CoreResult<Vec<String>> {
        engine::filter_authorized(&self.repo, namespace, subject, resource_type, permission, ids, self.max_resource_depth).await
    }

    pub async fn explain(&self, namespace: &str, subject: &Endpoint, permission: &str, resource: &Endpoint, resource_type: &str) -> CoreResult<Vec<ExplainPath>> {
        engine::explain(&self.repo, namespace, subject, permission, resource, resource_type, self.max_group_depth.max(self.max_resource_depth)).await
    }
}
