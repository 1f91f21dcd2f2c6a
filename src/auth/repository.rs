//! Persistence collaborator for refresh tokens and credentials.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use rocket_db_pools::sqlx::{self, FromRow, PgPool, Row, postgres::PgRow};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::Identity;
use crate::auth::refresh_store::RefreshTokenRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("record already exists: {0}")]
    Conflict(&'static str),
    #[error("persistence call exceeded {0:?}")]
    Timeout(Duration),
}

/// Stored credential for a principal. `email` is kept lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub identity: Identity,
    pub email: String,
    pub password_hash: String,
}

/// Keyed store with single-row atomicity. Nothing here spans more than one
/// row, apart from the bulk revocation which tolerates partial visibility.
#[automock]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn select_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Sets `revoked_at` when it is still null. Returns whether the row changed.
    async fn update_revoked_at(
        &self,
        token: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn revoke_all_for_identity(
        &self,
        identity: Identity,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn select_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    async fn insert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError>;
}

/// Runs a persistence call under a deadline. Elapsed deadlines surface as
/// [`StoreError::Timeout`]; dropping the returned future cancels the call.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[derive(Debug, Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token, identity, issued_at, expires_at, revoked_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&record.token)
        .bind(record.identity.as_uuid())
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|err| conflict_or(err, "refresh token"))?;

        Ok(())
    }

    async fn select_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT token, identity, issued_at, expires_at, revoked_at FROM refresh_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_revoked_at(
        &self,
        token: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 WHERE token = $2 AND revoked_at IS NULL",
        )
        .bind(revoked_at)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_identity(
        &self,
        identity: Identity,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 WHERE identity = $2 AND revoked_at IS NULL AND expires_at > $1",
        )
        .bind(revoked_at)
        .bind(identity.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn select_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            "SELECT identity, email, password_hash FROM credentials WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO credentials (identity, email, password_hash) VALUES ($1, $2, $3)")
            .bind(record.identity.as_uuid())
            .bind(&record.email)
            .bind(&record.password_hash)
            .execute(&self.pool)
            .await
            .map_err(|err| conflict_or(err, "credential"))?;

        Ok(())
    }
}

fn conflict_or(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict(what),
        _ => StoreError::Sqlx(err),
    }
}

impl<'r> FromRow<'r, PgRow> for RefreshTokenRecord {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            token: row.try_get("token")?,
            identity: row.try_get::<Uuid, _>("identity")?.into(),
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CredentialRecord {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            identity: row.try_get::<Uuid, _>("identity")?.into(),
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_fast_calls() {
        let value = bounded(Duration::from_millis(100), async { Ok::<_, StoreError>(7) })
            .await
            .expect("fast call");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn bounded_reports_elapsed_deadline() {
        let result = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }
}
