//! # Relationship Tuple Write Protocol
//!
//! Ordinary writes upsert on the uniqueness key. Writing a `member` edge to
//! a non-user subject, or any `parent` edge, additionally runs the
//! cycle-detection protocol: sort the two endpoint lock keys, acquire both
//! advisory locks, walk the relevant closure from the subject, and reject
//! if the resource is already reachable.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::database::advisory_xact_lock_pair;
use shared::errors::{CoreError, CoreResult};
use sqlx::PgPool;

use crate::audit::{self, AuditDomain};
use crate::context::OperationContext;
use crate::domain::authz::{Endpoint, RelationshipTuple, RESERVED_RELATION_MEMBER, RESERVED_RELATION_PARENT};
use crate::domain::events::AuthzEvent;
use crate::repository::TupleRepository;

/// Writes one relationship tuple, running the cycle-detection protocol when
/// `relation` is `member` to a non-`user` subject, or `parent`.
pub async fn write_tuple(
    pool: &PgPool,
    repo: &TupleRepository,
    ctx: &OperationContext,
    resource_type: &str,
    resource_id: &str,
    relation: &str,
    subject_type: &str,
    subject_id: &str,
    subject_relation: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
    max_depth: u32,
) -> CoreResult<RelationshipTuple> {
    ctx.validate()?;
    let resource = Endpoint::new(resource_type, resource_id);
    let subject = Endpoint::new(subject_type, subject_id);

    let needs_cycle_check = (relation == RESERVED_RELATION_MEMBER && subject_type != "user") || relation == RESERVED_RELATION_PARENT;

    if needs_cycle_check {
        if resource == subject {
            return Err(CoreError::CycleDetected);
        }

        let mut tx = pool.begin().await.map_err(CoreError::Database)?;
        let (key_a, key_b) = sorted_lock_keys(&ctx.namespace, &resource, &subject);
        advisory_xact_lock_pair(&mut tx, &key_a, &key_b).await?;

        let traversal_relation = relation;
        let (start, target) = cycle_check_endpoints(traversal_relation, &subject, &resource);
        let reachable = is_reachable(repo, &ctx.namespace, &start, &target, traversal_relation, max_depth).await?;
        if reachable {
            audit::record(
                &mut tx,
                AuditDomain::Authz,
                ctx,
                &AuthzEvent::TupleRejectedCycle {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                    relation: relation.to_string(),
                    subject_type: subject_type.to_string(),
                    subject_id: subject_id.to_string(),
                },
                Some(resource_type),
                Some(resource_id),
                None,
                None,
            )
            .await?;
            tx.commit().await.map_err(CoreError::Database)?;
            return Err(CoreError::CycleDetected);
        }

        let tuple = repo
            .insert(&mut tx, &ctx.namespace, resource_type, resource_id, relation, subject_type, subject_id, subject_relation, expires_at)
            .await?;
        audit::record(
            &mut tx,
            AuditDomain::Authz,
            ctx,
            &AuthzEvent::TupleWritten {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                relation: relation.to_string(),
                subject_type: subject_type.to_string(),
                subject_id: subject_id.to_string(),
            },
            Some(resource_type),
            Some(resource_id),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        return Ok(tuple);
    }

    let mut tx = pool.begin().await.map_err(CoreError::Database)?;
    let tuple = repo
        .insert(&mut tx, &ctx.namespace, resource_type, resource_id, relation, subject_type, subject_id, subject_relation, expires_at)
        .await?;
    audit::record(
        &mut tx,
        AuditDomain::Authz,
        ctx,
        &AuthzEvent::TupleWritten {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            relation: relation.to_string(),
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
        },
        Some(resource_type),
        Some(resource_id),
        None,
        None,
    )
    .await?;
    tx.commit().await.map_err(CoreError::Database)?;
    Ok(tuple)
}

/// Bulk writes are disallowed for `member` edges to non-user subjects and
/// for any `parent` edge — those must go through [`write_tuple`] one row at
/// a time so the cycle check runs per edge.
pub fn reject_if_bulk_unsafe(relation: &str, subject_type: &str) -> CoreResult<()> {
    if (relation == RESERVED_RELATION_MEMBER && subject_type != "user") || relation == RESERVED_RELATION_PARENT {
        return Err(CoreError::invalid_parameter(
            "relation",
            "member edges to non-user subjects and parent edges must use the single-row write path",
        ));
    }
    Ok(())
}

pub async fn delete_tuple(
    pool: &PgPool,
    repo: &TupleRepository,
    ctx: &OperationContext,
    resource_type: &str,
    resource_id: &str,
    relation: &str,
    subject_type: &str,
    subject_id: &str,
) -> CoreResult<bool> {
    ctx.validate()?;
    let removed = repo.delete(&ctx.namespace, resource_type, resource_id, relation, subject_type, subject_id).await?;

    if removed > 0 {
        let mut tx = pool.begin().await.map_err(CoreError::Database)?;
        audit::record(
            &mut tx,
            AuditDomain::Authz,
            ctx,
            &AuthzEvent::TupleDeleted {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                relation: relation.to_string(),
                subject_type: subject_type.to_string(),
                subject_id: subject_id.to_string(),
            },
            Some(resource_type),
            Some(resource_id),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
    }
    Ok(removed > 0)
}

pub async fn cleanup_expired(pool: &PgPool, repo: &TupleRepository, ctx: &OperationContext) -> CoreResult<u64> {
    ctx.validate()?;
    let purged = repo.delete_expired(&ctx.namespace).await?;
    if purged > 0 {
        let mut tx = pool.begin().await.map_err(CoreError::Database)?;
        audit::record(&mut tx, AuditDomain::Authz, ctx, &AuthzEvent::ExpiredTuplesPurged { count: purged }, None, None, None, None).await?;
        tx.commit().await.map_err(CoreError::Database)?;
    }
    Ok(purged)
}

fn sorted_lock_keys(namespace: &str, resource: &Endpoint, subject: &Endpoint) -> (String, String) {
    let a = resource.lock_key(namespace);
    let b = subject.lock_key(namespace);
    if a <= b { (a, b) } else { (b, a) }
}

/// Picks the BFS start/target pair for the cycle check. `member` edges
/// traverse subject --member--> resource (the direction `outgoing_member_edges`
/// walks), so asking "is the new resource already reachable from the new
/// subject" always misses — the new subject never has an *outgoing* member
/// edge yet. The check instead has to start from the new resource and ask
/// whether it can reach back to the new subject. `parent` edges traverse the
/// other way (resource --parent--> parent-resource), so subject-to-resource
/// is already the right direction there.
fn cycle_check_endpoints(relation: &str, subject: &Endpoint, resource: &Endpoint) -> (Endpoint, Endpoint) {
    if relation == RESERVED_RELATION_MEMBER {
        (resource.clone(), subject.clone())
    } else {
        (subject.clone(), resource.clone())
    }
}

/// Breadth-first search from `subject` along `relation` edges, bounded by
/// `max_depth`, testing whether `target` is reachable.
async fn is_reachable(repo: &TupleRepository, namespace: &str, subject: &Endpoint, target: &Endpoint, relation: &str, max_depth: u32) -> CoreResult<bool> {
    let mut visited: HashSet<Endpoint> = HashSet::new();
    visited.insert(subject.clone());
    let mut frontier = vec![subject.clone()];
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for node in &frontier {
            let edges = if relation == RESERVED_RELATION_MEMBER {
                repo.outgoing_member_edges(namespace, &node.kind, &node.id).await?
            } else {
                repo.outgoing_parent_edges(namespace, &node.kind, &node.id).await?
            };
            for edge in edges {
                let next_node = if relation == RESERVED_RELATION_MEMBER { edge.resource() } else { edge.subject() };
                if &next_node == target {
                    return Ok(true);
                }
                if visited.insert(next_node.clone()) {
                    next.push(next_node);
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_reference_lock_keys_are_deterministic() {
        let a = Endpoint::new("group", "eng");
        let b = Endpoint::new("group", "platform");
        let (k1, k2) = sorted_lock_keys("acme", &a, &b);
        assert!(k1 <= k2);
    }

    #[test]
    fn bulk_write_rejects_member_to_group() {
        assert!(reject_if_bulk_unsafe("member", "group").is_err());
        assert!(reject_if_bulk_unsafe("parent", "folder").is_err());
        assert!(reject_if_bulk_unsafe("member", "user").is_ok());
        assert!(reject_if_bulk_unsafe("editor", "user").is_ok());
    }

    /// team:a --member--> team:b --member--> team:c already exists; writing
    /// team:c --member--> team:a must search from the new resource (team:c)
    /// back to the new subject (team:a), not the other way around.
    #[test]
    fn cycle_check_starts_from_new_resource_for_member_edges() {
        let new_subject = Endpoint::new("team", "a");
        let new_resource = Endpoint::new("team", "c");
        let (start, target) = cycle_check_endpoints(RESERVED_RELATION_MEMBER, &new_subject, &new_resource);
        assert_eq!(start, new_resource);
        assert_eq!(target, new_subject);
    }

    #[test]
    fn cycle_check_keeps_subject_to_resource_for_parent_edges() {
        let subject = Endpoint::new("folder", "child");
        let resource = Endpoint::new("folder", "root");
        let (start, target) = cycle_check_endpoints(RESERVED_RELATION_PARENT, &subject, &resource);
        assert_eq!(start, subject);
        assert_eq!(target, resource);
    }
}
