//! # Impersonation Service
//!
//! `start_impersonation` refuses to chain: the actor's own session must not
//! already be an impersonated one, checked against both impersonation
//! tables for the operator variant.

use chrono::{Duration, Utc};
use shared::errors::{CoreError, CoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditDomain};
use crate::context::OperationContext;
use crate::domain::events::{AuthnEvent, OperatorEvent};
use crate::domain::identity::Session;
use crate::domain::impersonation::ImpersonationContext;
use crate::repository::{IdentityRepository, ImpersonationRepository};

#[derive(Debug, Clone)]
pub struct ImpersonationService {
    pool: PgPool,
    repo: ImpersonationRepository,
    identity_repo: IdentityRepository,
}

impl ImpersonationService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: ImpersonationRepository::new(pool.clone()),
            identity_repo: IdentityRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn start_impersonation(
        &self,
        ctx: &OperationContext,
        actor_session_id: Uuid,
        target_user_id: Uuid,
        new_session_token_hash: &str,
        reason: &str,
        duration: Duration,
        max_duration: Duration,
    ) -> CoreResult<(Session, Uuid)> {
        ctx.validate()?;
        if reason.trim().is_empty() {
            return Err(CoreError::invalid_parameter("reason", "must not be empty"));
        }
        if duration <= Duration::zero() || duration > max_duration {
            return Err(CoreError::invalid_parameter("duration", "must be within (0, max_impersonation_duration]"));
        }

        let actor_session = self.load_valid_session(&ctx.namespace, actor_session_id).await?;
        if self.repo.is_session_impersonated(&ctx.namespace, actor_session_id).await? {
            return Err(CoreError::invalid_parameter("actor_session", "already an impersonation session; chaining is not allowed"));
        }

        let target = self
            .identity_repo
            .find_user_by_id(&ctx.namespace, target_user_id)
            .await?
            .ok_or_else(|| CoreError::invalid_parameter("target_user", "not found"))?;
        if target.disabled_at.is_some() {
            return Err(CoreError::invalid_parameter("target_user", "disabled"));
        }
        if actor_session.user_id == target_user_id {
            return Err(CoreError::invalid_parameter("target_user", "actor cannot impersonate itself"));
        }

        let expires_at = Utc::now() + duration;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let new_session = self
            .identity_repo
            .create_session(&mut tx, &ctx.namespace, target_user_id, new_session_token_hash, expires_at, ctx.ip_address.as_deref(), Some("impersonation"))
            .await?;

        let record = self
            .repo
            .start(&mut tx, &ctx.namespace, actor_session.user_id, target_user_id, actor_session_id, new_session.id, reason, expires_at)
            .await?;

        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::ImpersonationStarted { actor_id: actor_session.user_id.to_string(), target_user_id: target_user_id.to_string() },
            Some("impersonation_session"),
            Some(&record.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;

        Ok((new_session, record.impersonation_session_id))
    }

    pub async fn end_impersonation(&self, ctx: &OperationContext, impersonation_session_id: Uuid) -> CoreResult<()> {
        ctx.validate()?;
        let record = self
            .repo
            .find_by_impersonation_session(&ctx.namespace, impersonation_session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("impersonation session"))?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.end(&mut tx, &ctx.namespace, impersonation_session_id).await?;
        self.identity_repo.revoke_session(&mut tx, &ctx.namespace, record.impersonation_session_id).await?;

        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::ImpersonationEnded { actor_id: record.actor_id.to_string(), target_user_id: record.target_user_id.to_string() },
            Some("impersonation_session"),
            Some(&record.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }

    pub async fn get_impersonation_context(&self, namespace: &str, session_id: Uuid) -> CoreResult<ImpersonationContext> {
        let Some(record) = self.repo.find_by_impersonation_session(namespace, session_id).await? else {
            return Ok(ImpersonationContext::none());
        };
        if !record.is_active(Utc::now()) {
            return Ok(ImpersonationContext::none());
        }
        Ok(ImpersonationContext {
            is_impersonating: true,
            actor_id: Some(record.actor_id),
            target_user_id: Some(record.target_user_id),
            reason: Some(record.reason),
            expires_at: Some(record.expires_at),
        })
    }

    async fn load_valid_session(&self, namespace: &str, session_id: Uuid) -> CoreResult<Session> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE namespace = $1 AND id = $2")
            .bind(namespace)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::invalid_parameter("actor_session", "not found"))?;

        let now = Utc::now();
        if session.revoked_at.is_some() || session.expires_at <= now {
            return Err(CoreError::invalid_parameter("actor_session", "not valid"));
        }
        let user = self
            .identity_repo
            .find_user_by_id(namespace, session.user_id)
            .await?
            .ok_or_else(|| CoreError::invalid_parameter("actor_session", "user not found"))?;
        if user.disabled_at.is_some() {
            return Err(CoreError::invalid_parameter("actor_session", "user disabled"));
        }
        Ok(session)
    }

    // -- cross-namespace operator impersonation -------------------------------

    pub async fn start_operator_impersonation(
        &self,
        operator_ctx: &OperationContext,
        operator_session_id: Uuid,
        operator_email: &str,
        target_namespace: &str,
        target_user_id: Uuid,
        target_user_email: &str,
        new_session_token_hash: &str,
        ticket_reference: Option<&str>,
        reason: &str,
        duration: Duration,
        max_duration: Duration,
    ) -> CoreResult<(Session, Uuid)> {
        operator_ctx.validate()?;
        if reason.trim().is_empty() {
            return Err(CoreError::invalid_parameter("reason", "must not be empty"));
        }
        if duration <= Duration::zero() || duration > max_duration {
            return Err(CoreError::invalid_parameter("duration", "must be within (0, max_duration]"));
        }

        let operator_session = self.load_valid_session(&operator_ctx.namespace, operator_session_id).await?;
        let already_chained = self.repo.is_session_impersonated(&operator_ctx.namespace, operator_session_id).await?
            || self.repo.find_operator_by_impersonation_session(operator_session_id).await?.is_some();
        if already_chained {
            return Err(CoreError::invalid_parameter("operator_session", "already an impersonation session; chaining is not allowed"));
        }

        let target = self
            .identity_repo
            .find_user_by_id(target_namespace, target_user_id)
            .await?
            .ok_or_else(|| CoreError::invalid_parameter("target_user", "not found"))?;
        if target.disabled_at.is_some() {
            return Err(CoreError::invalid_parameter("target_user", "disabled"));
        }

        let expires_at = Utc::now() + duration;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let new_session = self
            .identity_repo
            .create_session(&mut tx, target_namespace, target_user_id, new_session_token_hash, expires_at, operator_ctx.ip_address.as_deref(), Some("operator_impersonation"))
            .await?;

        let record = self
            .repo
            .start_operator(
                &mut tx,
                &operator_ctx.namespace,
                operator_session.user_id,
                operator_email,
                operator_session_id,
                target_namespace,
                target_user_id,
                target_user_email,
                new_session.id,
                ticket_reference,
                reason,
                expires_at,
            )
            .await?;

        audit::record(
            &mut tx,
            AuditDomain::Operator,
            operator_ctx,
            &OperatorEvent::CrossNamespaceImpersonationStarted {
                target_namespace: target_namespace.to_string(),
                target_user_id: target_user_id.to_string(),
                ticket_reference: ticket_reference.map(str::to_string),
            },
            Some("operator_impersonation_session"),
            Some(&record.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;

        Ok((new_session, record.impersonation_session_id))
    }

    pub async fn end_operator_impersonation(&self, operator_ctx: &OperationContext, impersonation_session_id: Uuid) -> CoreResult<()> {
        operator_ctx.validate()?;
        let record = self
            .repo
            .find_operator_by_impersonation_session(impersonation_session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("operator impersonation session"))?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        self.repo.end_operator(&mut tx, impersonation_session_id).await?;
        self.identity_repo.revoke_session(&mut tx, &record.target_namespace, record.impersonation_session_id).await?;

        audit::record(
            &mut tx,
            AuditDomain::Operator,
            operator_ctx,
            &OperatorEvent::CrossNamespaceImpersonationEnded {
                target_namespace: record.target_namespace.clone(),
                target_user_id: record.target_user_id.to_string(),
            },
            Some("operator_impersonation_session"),
            Some(&record.id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(())
    }
}
