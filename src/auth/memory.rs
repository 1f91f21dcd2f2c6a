//! In-process [`SessionRepository`] for tests and database-less local runs.
//!
//! Each map shard is locked for the duration of a single-key operation, which
//! gives the same per-record atomicity the SQL store gets from row locks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::auth::Identity;
use crate::auth::refresh_store::RefreshTokenRecord;
use crate::auth::repository::{CredentialRecord, SessionRepository, StoreError};

#[derive(Debug, Clone, Default)]
pub struct MemorySessionRepository {
    refresh_tokens: Arc<DashMap<String, RefreshTokenRecord>>,
    credentials: Arc<DashMap<String, CredentialRecord>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored record, for audit and assertions.
    pub fn refresh_token(&self, token: &str) -> Option<RefreshTokenRecord> {
        self.refresh_tokens
            .get(token)
            .map(|entry| entry.value().clone())
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.len()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        match self.refresh_tokens.entry(record.token.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("refresh token")),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn select_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.refresh_token(token))
    }

    async fn update_revoked_at(
        &self,
        token: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.refresh_tokens.get_mut(token) else {
            return Ok(false);
        };
        if record.revoked_at.is_some() {
            return Ok(false);
        }
        record.revoked_at = Some(revoked_at);
        Ok(true)
    }

    async fn revoke_all_for_identity(
        &self,
        identity: Identity,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut revoked = 0;
        for mut record in self.refresh_tokens.iter_mut() {
            if record.identity == identity
                && record.revoked_at.is_none()
                && record.expires_at > revoked_at
            {
                record.revoked_at = Some(revoked_at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn select_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self
            .credentials
            .get(&email.to_lowercase())
            .map(|entry| entry.value().clone()))
    }

    async fn insert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        match self.credentials.entry(record.email.to_lowercase()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("credential")),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(token: &str, identity: Identity, now: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            token: token.into(),
            identity,
            issued_at: now,
            expires_at: now + Duration::days(60),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn revoked_at_transitions_once() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        repo.insert_refresh_token(&record("t1", Identity::new_v4(), now))
            .await
            .expect("insert");

        assert!(repo.update_revoked_at("t1", now).await.expect("first"));
        assert!(
            !repo
                .update_revoked_at("t1", now + Duration::seconds(5))
                .await
                .expect("second")
        );
        assert_eq!(
            repo.refresh_token("t1").and_then(|r| r.revoked_at),
            Some(now)
        );
        assert!(!repo.update_revoked_at("missing", now).await.expect("missing"));
    }

    #[tokio::test]
    async fn duplicate_token_is_a_conflict() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let first = record("dup", Identity::new_v4(), now);
        repo.insert_refresh_token(&first).await.expect("insert");

        let result = repo
            .insert_refresh_token(&record("dup", Identity::new_v4(), now))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(repo.refresh_token("dup"), Some(first));
    }

    #[tokio::test]
    async fn credentials_match_email_case_insensitively() {
        let repo = MemorySessionRepository::new();
        let credential = CredentialRecord {
            identity: Identity::new_v4(),
            email: "walt@breakingbad.com".into(),
            password_hash: "$argon2id$placeholder".into(),
        };
        repo.insert_credential(&credential).await.expect("insert");

        let found = repo
            .select_credential_by_email("Walt@BreakingBad.com")
            .await
            .expect("lookup");
        assert_eq!(found, Some(credential));
    }

    #[tokio::test]
    async fn bulk_revocation_skips_other_identities_and_dead_tokens() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let owner = Identity::new_v4();
        let other = Identity::new_v4();

        repo.insert_refresh_token(&record("a", owner, now)).await.expect("a");
        repo.insert_refresh_token(&record("b", owner, now)).await.expect("b");
        repo.insert_refresh_token(&record("c", other, now)).await.expect("c");
        repo.update_revoked_at("b", now).await.expect("revoke b");

        let revoked = repo
            .revoke_all_for_identity(owner, now + Duration::minutes(1))
            .await
            .expect("revoke all");

        assert_eq!(revoked, 1);
        assert!(repo.refresh_token("a").and_then(|r| r.revoked_at).is_some());
        assert_eq!(repo.refresh_token("b").and_then(|r| r.revoked_at), Some(now));
        assert!(repo.refresh_token("c").and_then(|r| r.revoked_at).is_none());
    }
}
