//! # Refresh-Token Rotation Service
//!
//! Implements the family state machine: current → replaced → revoked, with
//! reuse of an already-replaced token revoking the entire family. Steps 1–6
//! of `rotate` run inside one transaction under a row lock on the presented
//! token so two concurrent rotations of the same token cannot both succeed.

use chrono::{Duration, Utc};
use shared::errors::{CoreError, CoreResult};
use shared::validation::validate_hash;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditDomain};
use crate::context::OperationContext;
use crate::domain::events::AuthnEvent;
use crate::domain::refresh::RotatedToken;
use crate::repository::{IdentityRepository, RefreshRepository};

#[derive(Debug, Clone)]
pub struct RefreshService {
    pool: PgPool,
    refresh_repo: RefreshRepository,
    identity_repo: IdentityRepository,
}

impl RefreshService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            refresh_repo: RefreshRepository::new(pool.clone()),
            identity_repo: IdentityRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn create_family(&self, ctx: &OperationContext, user_id: Uuid, session_id: Uuid, token_hash: &str, duration: Duration) -> CoreResult<RotatedToken> {
        ctx.validate()?;
        validate_hash("token_hash", token_hash)?;
        let expires_at = Utc::now() + duration;
        let token = self.refresh_repo.create_family(&ctx.namespace, user_id, session_id, token_hash, expires_at).await?;
        Ok(RotatedToken {
            user_id: token.user_id,
            session_id: token.session_id,
            new_token_id: token.id,
            family_id: token.family_id,
            generation: token.generation,
            expires_at: token.expires_at,
        })
    }

    /// Returns `Ok(None)` for every precondition failure the contract calls
    /// "empty" (not found, reused, revoked, expired, or the bound session
    /// invalid / user disabled) — only a genuine infrastructure error is an
    /// `Err`.
    pub async fn rotate(&self, ctx: &OperationContext, old_hash: &str, new_hash: &str, ttl: Duration) -> CoreResult<Option<RotatedToken>> {
        ctx.validate()?;
        validate_hash("old_hash", old_hash)?;
        validate_hash("new_hash", new_hash)?;

        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;

        let Some(old) = self.refresh_repo.lock_by_hash(&mut tx, &ctx.namespace, old_hash).await? else {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(None);
        };

        if old.replaced_by.is_some() {
            let revoked = self.refresh_repo.revoke_family(&mut tx, &ctx.namespace, old.family_id).await?;
            audit::record(
                &mut tx,
                AuditDomain::Authn,
                ctx,
                &AuthnEvent::RefreshTokenReuseDetected { family_id: old.family_id.to_string(), generation: old.generation },
                Some("refresh_token_family"),
                Some(&old.family_id.to_string()),
                None,
                Some(serde_json::json!({ "tokens_revoked": revoked })),
            )
            .await?;
            tx.commit().await.map_err(CoreError::Database)?;
            return Ok(None);
        }

        let now = Utc::now();
        if old.revoked_at.is_some() || old.expires_at <= now {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(None);
        }

        let bound_session = sqlx::query_as::<_, crate::domain::identity::Session>(
            "SELECT * FROM sessions WHERE namespace = $1 AND id = $2",
        )
        .bind(&ctx.namespace)
        .bind(old.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(CoreError::Database)?;

        let Some(bound_session) = bound_session else {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(None);
        };
        if bound_session.revoked_at.is_some() || bound_session.expires_at <= now {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(None);
        }

        let user = self.identity_repo.find_user_by_id(&ctx.namespace, old.user_id).await?;
        if user.map(|u| u.disabled_at.is_some()).unwrap_or(true) {
            tx.rollback().await.map_err(CoreError::Database)?;
            return Ok(None);
        }

        let new_generation = old.generation + 1;
        let new_expires_at = now + ttl;
        let new_token = self
            .refresh_repo
            .insert_next_generation(&mut tx, &ctx.namespace, old.user_id, old.session_id, old.family_id, new_generation, new_hash, new_expires_at)
            .await?;
        self.refresh_repo.mark_replaced(&mut tx, &ctx.namespace, old.id, new_token.id).await?;

        audit::record(
            &mut tx,
            AuditDomain::Authn,
            ctx,
            &AuthnEvent::RefreshTokenRotated { family_id: old.family_id.to_string(), generation: new_generation },
            Some("refresh_token_family"),
            Some(&old.family_id.to_string()),
            None,
            None,
        )
        .await?;
        tx.commit().await.map_err(CoreError::Database)?;

        Ok(Some(RotatedToken {
            user_id: new_token.user_id,
            session_id: new_token.session_id,
            new_token_id: new_token.id,
            family_id: new_token.family_id,
            generation: new_token.generation,
            expires_at: new_token.expires_at,
        }))
    }

    pub async fn revoke_family(&self, namespace: &str, family_id: Uuid) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(CoreError::Database)?;
        let revoked = self.refresh_repo.revoke_family(&mut tx, namespace, family_id).await?;
        tx.commit().await.map_err(CoreError::Database)?;
        Ok(revoked)
    }

    pub async fn revoke_session_family(&self, namespace: &str, session_id: Uuid) -> CoreResult<u64> {
        self.refresh_repo.revoke_session_family(namespace, session_id).await
    }
}
