use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::auth::repository::{SessionRepository, bounded};
use crate::auth::{AuthError, AuthResult, Identity};

const SECRET_LEN: usize = 32;

/// Persisted refresh token row. Only `revoked_at` ever changes after insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub identity: Identity,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenState {
    Active,
    Expired,
    Revoked,
}

impl RefreshTokenRecord {
    /// Revocation wins over expiry so audits see the explicit transition.
    pub fn state_at(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.revoked_at.is_some() {
            RefreshTokenState::Revoked
        } else if self.expires_at <= now {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Active
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRefreshToken {
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

/// Issues and tracks opaque refresh tokens.
///
/// Nothing is cached: every lookup and revocation goes to the repository, so
/// a revocation is visible to the next request on any node.
#[derive(Clone)]
pub struct RefreshTokenStore {
    repository: Arc<dyn SessionRepository>,
    ttl: Duration,
    timeout: std::time::Duration,
}

impl RefreshTokenStore {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        ttl: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            repository,
            ttl,
            timeout,
        }
    }

    pub async fn issue(
        &self,
        identity: Identity,
        now: DateTime<Utc>,
    ) -> AuthResult<IssuedRefreshToken> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Config("refresh token ttl out of range".into()))?;
        let record = RefreshTokenRecord {
            token: generate_secret()?,
            identity,
            issued_at: now,
            expires_at,
            revoked_at: None,
        };

        bounded(self.timeout, self.repository.insert_refresh_token(&record)).await?;
        log::debug!("issued refresh token for {identity}");

        Ok(IssuedRefreshToken {
            token: record.token,
            identity,
            expires_at: record.expires_at,
        })
    }

    /// Fails with `NotFound`, `Revoked` or `Expired`; callers facing the
    /// network should fold these with [`AuthError::into_session_error`].
    pub async fn resolve(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<ResolvedRefreshToken> {
        let record = bounded(self.timeout, self.repository.select_refresh_token(token))
            .await?
            .ok_or(AuthError::NotFound)?;

        match record.state_at(now) {
            RefreshTokenState::Revoked => Err(AuthError::Revoked),
            RefreshTokenState::Expired => Err(AuthError::Expired),
            RefreshTokenState::Active => Ok(ResolvedRefreshToken {
                identity: record.identity,
                expires_at: record.expires_at,
            }),
        }
    }

    /// Idempotent: unknown and already-revoked tokens succeed silently.
    pub async fn revoke(&self, token: &str, now: DateTime<Utc>) -> AuthResult<()> {
        let changed = bounded(self.timeout, self.repository.update_revoked_at(token, now)).await?;
        if changed {
            log::debug!("refresh token revoked");
        }
        Ok(())
    }

    pub async fn revoke_all(&self, identity: Identity, now: DateTime<Utc>) -> AuthResult<u64> {
        let revoked = bounded(
            self.timeout,
            self.repository.revoke_all_for_identity(identity, now),
        )
        .await?;
        log::info!("revoked {revoked} refresh token(s) for {identity}");
        Ok(revoked)
    }

    /// Audit view; `None` when no record exists.
    pub async fn status(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<RefreshTokenState>> {
        let record = bounded(self.timeout, self.repository.select_refresh_token(token)).await?;
        Ok(record.map(|record| record.state_at(now)))
    }
}

fn generate_secret() -> AuthResult<String> {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
