//! # Operation Context
//!
//! The explicit replacement for transaction-local session settings. Every
//! service call that mutates state takes an `&OperationContext` and reads
//! `actor_id`/`request_id`/`ip_address`/`user_agent`/`on_behalf_of`/`reason`
//! off it to populate the audit row it writes inside the same transaction.
//!
//! There is no global or thread-local state here: a caller builds one
//! `OperationContext` per inbound request and passes it by reference into
//! every call that request makes.

use shared::errors::CoreResult;
use shared::validation::{validate_namespace, validate_opaque_id};

/// Per-call actor and tenant metadata.
///
/// `namespace` is the tenant binding; an empty namespace is rejected at
/// construction rather than silently failing closed later, since every
/// write path requires a namespace to scope its query by.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Tenant binding every query and mutation is scoped to.
    pub namespace: String,
    /// Identity of the caller performing the operation, if known.
    pub actor_id: Option<String>,
    /// Correlates this operation with a caller-side request id.
    pub request_id: Option<String>,
    /// Client IP address, captured for audit trails.
    pub ip_address: Option<String>,
    /// Client user agent, captured for audit trails.
    pub user_agent: Option<String>,
    /// Set when the actor is acting for someone else (e.g. impersonation).
    pub on_behalf_of: Option<String>,
    /// Free-text justification, required for operations that mandate one
    /// (e.g. starting impersonation).
    pub reason: Option<String>,
}

impl OperationContext {
    /// Builds a context for the given namespace, with every optional field
    /// left unset.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), ..Default::default() }
    }

    /// Attaches an actor id.
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Attaches a request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches an IP address.
    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Attaches a user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Attaches a reason, required by operations like `start_impersonation`.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Validates every set field eagerly, so a malformed IP or namespace
    /// fails before any transaction opens rather than during audit
    /// emission.
    pub fn validate(&self) -> CoreResult<()> {
        validate_namespace("namespace", &self.namespace)?;
        if let Some(actor_id) = &self.actor_id {
            validate_opaque_id("actor_id", actor_id)?;
        }
        if let Some(request_id) = &self.request_id {
            validate_opaque_id("request_id", request_id)?;
        }
        if let Some(ip_address) = &self.ip_address {
            validate_opaque_id("ip_address", ip_address)?;
        }
        if let Some(user_agent) = &self.user_agent {
            validate_opaque_id("user_agent", user_agent)?;
        }
        if let Some(on_behalf_of) = &self.on_behalf_of {
            validate_opaque_id("on_behalf_of", on_behalf_of)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain_sets_every_field() {
        let ctx = OperationContext::new("acme")
            .with_actor("user-1")
            .with_request_id("req-1")
            .with_ip_address("203.0.113.9")
            .with_user_agent("curl/8.0")
            .with_reason("support ticket #1");

        assert_eq!(ctx.namespace, "acme");
        assert_eq!(ctx.actor_id.as_deref(), Some("user-1"));
        assert_eq!(ctx.reason.as_deref(), Some("support ticket #1"));
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn empty_namespace_fails_validation() {
        let ctx = OperationContext::new("");
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn control_characters_in_ip_fail_immediately() {
        let ctx = OperationContext::new("acme").with_ip_address("10.0.0.1\n");
        assert!(ctx.validate().is_err());
    }
}
