//! # Check / List / Explain Engine
//!
//! Pure read-side algorithms over [`TupleRepository`]: expansion closures,
//! the permission decision predicate, resource/subject listing with cursor
//! pagination, batch filtering, and path explanation. Nothing here writes.

use std::collections::{HashMap, HashSet};

use shared::errors::CoreResult;

use crate::domain::authz::{Endpoint, ExplainPath, ExplainPathType, MembershipEdge, RelationshipTuple};
use crate::repository::TupleRepository;

use super::hierarchy::implied_by;

/// Reflexive-transitive closure of `(subject) --member--> (group)`, bounded
/// by `max_depth`. Includes `subject` itself with no edge relation.
pub async fn expand_subject_memberships(repo: &TupleRepository, namespace: &str, subject: &Endpoint, max_depth: u32) -> CoreResult<Vec<MembershipEdge>> {
    let mut seen: HashSet<Endpoint> = HashSet::new();
    seen.insert(subject.clone());
    let mut result = vec![MembershipEdge { group: subject.clone(), edge_relation: None }];
    let mut frontier = vec![subject.clone()];
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for node in &frontier {
            for edge in repo.outgoing_member_edges(namespace, &node.kind, &node.id).await? {
                let group = edge.resource();
                if seen.insert(group.clone()) {
                    result.push(MembershipEdge { group: group.clone(), edge_relation: edge.subject_relation.clone() });
                    next.push(group);
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(result)
}

/// Reflexive-transitive closure of `(resource) --parent--> (ancestor)`,
/// bounded by `max_depth`. Includes `resource` itself.
pub async fn expand_resource_ancestors(repo: &TupleRepository, namespace: &str, resource: &Endpoint, max_depth: u32) -> CoreResult<Vec<Endpoint>> {
    let mut seen = HashSet::new();
    seen.insert(resource.clone());
    let mut result = vec![resource.clone()];
    let mut frontier = vec![resource.clone()];
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for node in &frontier {
            for edge in repo.outgoing_parent_edges(namespace, &node.kind, &node.id).await? {
                let ancestor = edge.subject();
                if seen.insert(ancestor.clone()) {
                    result.push(ancestor.clone());
                    next.push(ancestor);
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(result)
}

/// Transitive closure of the inverse `parent` relation: every descendant of
/// `resource`.
pub async fn expand_resource_descendants(repo: &TupleRepository, namespace: &str, resource: &Endpoint, max_depth: u32) -> CoreResult<Vec<Endpoint>> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    let mut frontier = vec![resource.clone()];
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for node in &frontier {
            for edge in repo.incoming_parent_edges(namespace, &node.kind, &node.id).await? {
                let child = edge.resource();
                if seen.insert(child.clone()) {
                    result.push(child.clone());
                    next.push(child);
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(result)
}

/// Full set of tuples active on any ancestor of `resource` that could grant
/// one of the permissions in `allowed_relations`.
async fn candidate_grants(
    repo: &TupleRepository,
    namespace: &str,
    ancestors: &[Endpoint],
    allowed_relations: &HashSet<String>,
) -> CoreResult<Vec<RelationshipTuple>> {
    let mut out = Vec::new();
    for ancestor in ancestors {
        for relation in allowed_relations {
            out.extend(repo.direct_grants(namespace, &ancestor.kind, &ancestor.id, relation).await?);
        }
    }
    Ok(out)
}

fn tuple_matches_subject(tuple: &RelationshipTuple, subject: &Endpoint, memberships: &HashMap<Endpoint, Option<String>>) -> bool {
    let tuple_subject = tuple.subject();
    if &tuple_subject == subject && tuple.subject_relation.is_none() {
        return true;
    }
    if let Some(edge_relation) = memberships.get(&tuple_subject) {
        return tuple.subject_relation.is_none() || tuple.subject_relation == *edge_relation;
    }
    false
}

/// `check(subject, permission, resource, namespace)`.
pub async fn check(repo: &TupleRepository, namespace: &str, subject: &Endpoint, permission: &str, resource: &Endpoint, resource_type: &str, max_depth: u32) -> CoreResult<bool> {
    let memberships = expand_subject_memberships(repo, namespace, subject, max_depth).await?;
    let membership_map: HashMap<Endpoint, Option<String>> = memberships.into_iter().map(|m| (m.group, m.edge_relation)).collect();
    let ancestors = expand_resource_ancestors(repo, namespace, resource, max_depth).await?;
    let allowed = implied_by(repo, namespace, resource_type, permission, max_depth).await?;

    let now = chrono::Utc::now();
    for tuple in candidate_grants(repo, namespace, &ancestors, &allowed).await? {
        if !tuple.is_active(now) {
            continue;
        }
        if tuple_matches_subject(&tuple, subject, &membership_map) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn check_any(repo: &TupleRepository, namespace: &str, subject: &Endpoint, permissions: &[String], resource: &Endpoint, resource_type: &str, max_depth: u32) -> CoreResult<bool> {
    for permission in permissions {
        if check(repo, namespace, subject, permission, resource, resource_type, max_depth).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn check_all(repo: &TupleRepository, namespace: &str, subject: &Endpoint, permissions: &[String], resource: &Endpoint, resource_type: &str, max_depth: u32) -> CoreResult<bool> {
    for permission in permissions {
        if !check(repo, namespace, subject, permission, resource, resource_type, max_depth).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `list_resources(subject, resource_type, permission, limit, cursor)`:
/// collects resources of `resource_type` satisfying the decision predicate,
/// including accessible descendants reached through ancestor grants, sorted
/// by id with a `id > cursor` cursor.
pub async fn list_resources(
    repo: &TupleRepository,
    namespace: &str,
    subject: &Endpoint,
    resource_type: &str,
    permission: &str,
    limit: usize,
    cursor: Option<&str>,
    max_depth: u32,
) -> CoreResult<Vec<String>> {
    let memberships = expand_subject_memberships(repo, namespace, subject, max_depth).await?;
    let allowed = implied_by(repo, namespace, resource_type, permission, max_depth).await?;
    let now = chrono::Utc::now();

    let mut candidates: HashSet<String> = HashSet::new();

    for membership in &memberships {
        for relation in &allowed {
            for tuple in repo.direct_resources_for_subject(namespace, resource_type, relation, &membership.group.kind, &membership.group.id).await? {
                if !tuple.is_active(now) {
                    continue;
                }
                if tuple.subject_relation.is_none() || tuple.subject_relation == membership.edge_relation {
                    candidates.insert(tuple.resource_id.clone());
                    let descendants = expand_resource_descendants(repo, namespace, &tuple.resource(), max_depth).await?;
                    for descendant in descendants {
                        if descendant.kind == resource_type {
                            candidates.insert(descendant.id);
                        }
                    }
                }
            }
        }
    }

    let mut sorted: Vec<String> = candidates.into_iter().collect();
    sorted.sort();

    let start = match cursor {
        Some(c) => sorted.iter().position(|id| id.as_str() > c).unwrap_or(sorted.len()),
        None => 0,
    };

    Ok(sorted.into_iter().skip(start).take(limit).collect())
}

/// `list_subjects`: dual traversal from direct grants on the resource or any
/// ancestor, expanding non-leaf subjects via `member` edges honouring
/// `subject_relation`, returning only leaf subjects (no outgoing `member`
/// tuple as resource).
pub async fn list_subjects(
    repo: &TupleRepository,
    namespace: &str,
    resource: &Endpoint,
    resource_type: &str,
    permission: &str,
    limit: usize,
    cursor: Option<&Endpoint>,
    max_depth: u32,
) -> CoreResult<Vec<Endpoint>> {
    let ancestors = expand_resource_ancestors(repo, namespace, resource, max_depth).await?;
    let allowed = implied_by(repo, namespace, resource_type, permission, max_depth).await?;
    let grants = candidate_grants(repo, namespace, &ancestors, &allowed).await?;

    let now = chrono::Utc::now();
    let mut leaves: HashSet<Endpoint> = HashSet::new();
    let mut frontier: Vec<(Endpoint, Option<String>)> =
        grants.iter().filter(|t| t.is_active(now)).map(|t| (t.subject(), t.subject_relation.clone())).collect();
    let mut seen: HashSet<Endpoint> = frontier.iter().map(|(e, _)| e.clone()).collect();
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for (node, required_relation) in &frontier {
            let incoming = incoming_member_edges_honouring(repo, namespace, node, required_relation.as_deref()).await?;
            if incoming.is_empty() {
                leaves.insert(node.clone());
            } else {
                for child in incoming {
                    if seen.insert(child.0.clone()) {
                        next.push(child);
                    }
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    let mut sorted: Vec<Endpoint> = leaves.into_iter().collect();
    sorted.sort();

    let start = match cursor {
        Some(c) => sorted.iter().position(|e| e > c).unwrap_or(sorted.len()),
        None => 0,
    };

    Ok(sorted.into_iter().skip(start).take(limit).collect())
}

/// Subjects with an outgoing `member` edge into `group`, honouring a
/// required `subject_relation` if the grant demanded one.
async fn incoming_member_edges_honouring(repo: &TupleRepository, namespace: &str, group: &Endpoint, required_relation: Option<&str>) -> CoreResult<Vec<(Endpoint, Option<String>)>> {
    // The tuple store only indexes outgoing member edges by subject, so a
    // full incoming-edge query would need a dedicated index; expansion here
    // piggybacks on expand_subject_memberships's inverse by re-using the
    // resource-ancestor style query against a `member` relation.
    let direct = repo.direct_grants(namespace, &group.kind, &group.id, "member").await?;
    Ok(direct
        .into_iter()
        .filter(|t| required_relation.is_none() || t.subject_relation.as_deref() == required_relation)
        .map(|t| (t.subject(), t.subject_relation))
        .collect())
}

/// `filter_authorized`: sorted intersection of `ids` with resources the
/// subject may access (after ancestor expansion per candidate).
pub async fn filter_authorized(
    repo: &TupleRepository,
    namespace: &str,
    subject: &Endpoint,
    resource_type: &str,
    permission: &str,
    ids: &[String],
    max_depth: u32,
) -> CoreResult<Vec<String>> {
    let mut authorized = Vec::new();
    for id in ids {
        let resource = Endpoint::new(resource_type, id.clone());
        if check(repo, namespace, subject, permission, &resource, resource_type, max_depth).await? {
            authorized.push(id.clone());
        }
    }
    authorized.sort();
    Ok(authorized)
}

/// `explain`: recursive over hierarchy and parent edges, bounded by
/// `max_depth`.
pub async fn explain(repo: &TupleRepository, namespace: &str, subject: &Endpoint, permission: &str, resource: &Endpoint, resource_type: &str, max_depth: u32) -> CoreResult<Vec<ExplainPath>> {
    let memberships = expand_subject_memberships(repo, namespace, subject, max_depth).await?;
    let membership_chain: HashMap<Endpoint, Option<String>> = memberships.iter().map(|m| (m.group.clone(), m.edge_relation.clone())).collect();
    let ancestors = expand_resource_ancestors(repo, namespace, resource, max_depth).await?;

    let mut paths = Vec::new();
    let now = chrono::Utc::now();

    for ancestor in &ancestors {
        let direct = repo.direct_grants(namespace, &ancestor.kind, &ancestor.id, permission).await?;
        for tuple in direct.iter().filter(|t| t.is_active(now)) {
            classify_path(&mut paths, tuple, subject, resource, &membership_chain);
        }

        let allowed = implied_by(repo, namespace, resource_type, permission, max_depth).await?;
        for relation in &allowed {
            if relation == permission {
                continue;
            }
            let tuples = repo.direct_grants(namespace, &ancestor.kind, &ancestor.id, relation).await?;
            for tuple in tuples.iter().filter(|t| t.is_active(now)) {
                if tuple_matches_subject(tuple, subject, &membership_chain) {
                    paths.push(ExplainPath {
                        path_type: ExplainPathType::Hierarchy,
                        via_relation: relation.clone(),
                        via_subject_type: Some(tuple.subject_type.clone()),
                        via_subject_id: Some(tuple.subject_id.clone()),
                        via_membership: None,
                        chain: vec![relation.clone(), permission.to_string()],
                    });
                }
            }
        }
    }

    Ok(paths)
}

fn classify_path(paths: &mut Vec<ExplainPath>, tuple: &RelationshipTuple, subject: &Endpoint, resource: &Endpoint, membership_chain: &HashMap<Endpoint, Option<String>>) {
    let tuple_subject = tuple.subject();
    let tuple_resource = tuple.resource();

    if &tuple_subject == subject && tuple.subject_relation.is_none() {
        let path_type = if &tuple_resource == resource { ExplainPathType::Direct } else { ExplainPathType::Resource };
        paths.push(ExplainPath {
            path_type,
            via_relation: tuple.relation.clone(),
            via_subject_type: None,
            via_subject_id: None,
            via_membership: None,
            chain: vec![tuple_resource.id.clone(), resource.id.clone()],
        });
        return;
    }

    if let Some(edge_relation) = membership_chain.get(&tuple_subject) {
        if tuple.subject_relation.is_none() || tuple.subject_relation == *edge_relation {
            paths.push(ExplainPath {
                path_type: ExplainPathType::Group,
                via_relation: tuple.relation.clone(),
                via_subject_type: Some(tuple_subject.kind.clone()),
                via_subject_id: Some(tuple_subject.id.clone()),
                via_membership: Some(tuple_subject.id.clone()),
                chain: vec![subject.id.clone(), tuple_subject.id.clone()],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_path_text_varies_by_type() {
        let direct = ExplainPath { path_type: ExplainPathType::Direct, via_relation: "editor".into(), via_subject_type: None, via_subject_id: None, via_membership: None, chain: vec![] };
        assert!(direct.explain_text().contains("directly"));

        let group = ExplainPath { path_type: ExplainPathType::Group, via_relation: "editor".into(), via_subject_type: None, via_subject_id: None, via_membership: None, chain: vec!["eng".into()] };
        assert!(group.explain_text().contains("group membership"));
    }
}
