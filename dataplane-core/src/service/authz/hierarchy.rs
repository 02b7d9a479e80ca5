//! # Permission Hierarchy Closure
//!
//! Pure graph functions over [`crate::repository::TupleRepository`]'s
//! hierarchy-rule reads. `implied_by` reads both the tenant namespace and
//! the reserved `global` namespace, so app-wide defaults compose with
//! tenant overrides without the caller doing anything special.

use std::collections::HashSet;

use shared::errors::CoreResult;

use crate::repository::TupleRepository;

pub const GLOBAL_NAMESPACE: &str = "global";

/// Reflexive-transitive closure of the `implies` relation: every permission
/// that, if held, is sufficient to also satisfy `permission`.
pub async fn implied_by(repo: &TupleRepository, namespace: &str, resource_type: &str, permission: &str, max_depth: u32) -> CoreResult<HashSet<String>> {
    let mut closure = HashSet::new();
    closure.insert(permission.to_string());
    let mut frontier = vec![permission.to_string()];
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for current in &frontier {
            for ns in [namespace, GLOBAL_NAMESPACE] {
                for rule in repo.hierarchy_rules_implying(ns, resource_type, current).await? {
                    if closure.insert(rule.permission.clone()) {
                        next.push(rule.permission);
                    }
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_namespace_is_reserved_literal() {
        assert_eq!(GLOBAL_NAMESPACE, "global");
    }
}
