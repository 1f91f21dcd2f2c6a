use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chirpy_api::auth::refresh_store::RefreshTokenRecord;
use chirpy_api::auth::repository::CredentialRecord;
use chirpy_api::auth::{
    AuthError, Identity, MemorySessionRepository, PgSessionRepository, RefreshTokenState,
    SessionRepository, StoreError,
};
use chirpy_api::test_support::{TestDatabase, TestDatabaseError, test_authority};
use chrono::{DateTime, Duration, DurationRound, Utc};
use rocket::http::{Header, HeaderMap};

fn bearer(token: &str) -> HeaderMap<'static> {
    let mut headers = HeaderMap::new();
    headers.add(Header::new("Authorization", format!("Bearer {token}")));
    headers
}

fn record(token: &str, identity: Identity) -> RefreshTokenRecord {
    // Postgres keeps microseconds; trim so stored rows compare equal.
    let now = Utc::now()
        .duration_trunc(Duration::seconds(1))
        .expect("truncate timestamp");
    RefreshTokenRecord {
        token: token.to_string(),
        identity,
        issued_at: now,
        expires_at: now + Duration::days(60),
        revoked_at: None,
    }
}

/// Delegates to an inner store and counts revocations that changed a row.
struct TransitionCounter {
    inner: Arc<dyn SessionRepository>,
    transitions: AtomicU64,
}

impl TransitionCounter {
    fn wrap(inner: Arc<dyn SessionRepository>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            transitions: AtomicU64::new(0),
        })
    }

    fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionRepository for TransitionCounter {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.inner.insert_refresh_token(record).await
    }

    async fn select_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.inner.select_refresh_token(token).await
    }

    async fn update_revoked_at(
        &self,
        token: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let changed = self.inner.update_revoked_at(token, revoked_at).await?;
        if changed {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(changed)
    }

    async fn revoke_all_for_identity(
        &self,
        identity: Identity,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.revoke_all_for_identity(identity, revoked_at).await
    }

    async fn select_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.inner.select_credential_by_email(email).await
    }

    async fn insert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.inner.insert_credential(record).await
    }
}

/// Walks one repository through the full login, refresh and revoke cycle.
async fn exercise_session_cycle(repository: Arc<dyn SessionRepository>) {
    let authority = test_authority(Arc::clone(&repository));

    let identity = authority
        .register_credential("lane@chirpy.dev", "correct horse")
        .await
        .expect("credential registered");
    assert!(matches!(
        authority
            .register_credential(" Lane@Chirpy.dev ", "another horse")
            .await,
        Err(AuthError::Persistence(StoreError::Conflict(_)))
    ));

    let session = authority
        .login("LANE@chirpy.dev", "correct horse")
        .await
        .expect("login");
    assert_eq!(session.identity, identity);
    assert_eq!(
        authority
            .authenticate(&bearer(&session.access_token.token))
            .expect("access token verifies"),
        identity
    );

    let refreshed = authority
        .refresh(&bearer(&session.refresh_token.token))
        .await
        .expect("refresh");
    assert_eq!(refreshed.identity, identity);

    authority
        .revoke(&bearer(&session.refresh_token.token))
        .await
        .expect("revoke");
    authority
        .revoke(&bearer(&session.refresh_token.token))
        .await
        .expect("second revoke is a no-op");

    let err = authority
        .refresh(&bearer(&session.refresh_token.token))
        .await
        .expect_err("revoked token must not refresh");
    assert!(matches!(err, AuthError::InvalidSession));

    let status = authority
        .refresh_store()
        .status(&session.refresh_token.token, Utc::now())
        .await
        .expect("status lookup");
    assert_eq!(status, Some(RefreshTokenState::Revoked));

    let err = authority
        .login("lane@chirpy.dev", "wrong horse")
        .await
        .expect_err("wrong password");
    assert!(matches!(err, AuthError::InvalidCredentials));
}

async fn exercise_revoke_all(repository: Arc<dyn SessionRepository>) {
    let authority = test_authority(Arc::clone(&repository));
    authority
        .register_credential("multi@chirpy.dev", "pw")
        .await
        .expect("credential registered");

    let first = authority.login("multi@chirpy.dev", "pw").await.expect("login");
    let second = authority.login("multi@chirpy.dev", "pw").await.expect("login");
    assert_ne!(first.refresh_token.token, second.refresh_token.token);

    let revoked = authority
        .revoke_all(first.identity)
        .await
        .expect("revoke all");
    assert_eq!(revoked, 2);

    for token in [&first.refresh_token.token, &second.refresh_token.token] {
        let err = authority
            .refresh(&bearer(token))
            .await
            .expect_err("all sessions ended");
        assert!(matches!(err, AuthError::InvalidSession));
    }
}

async fn race_revocations(repository: Arc<dyn SessionRepository>) {
    let stored = record("contended-token", Identity::new_v4());
    repository
        .insert_refresh_token(&stored)
        .await
        .expect("insert");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let repository = Arc::clone(&repository);
        handles.push(tokio::spawn(async move {
            repository
                .update_revoked_at("contended-token", Utc::now())
                .await
                .expect("update")
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task joined") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one revocation should take effect");

    let after = repository
        .select_refresh_token("contended-token")
        .await
        .expect("select")
        .expect("record present");
    assert!(after.revoked_at.is_some());
}

/// Many callers revoke the same session at once through the authority.
async fn race_session_revocations(repository: Arc<dyn SessionRepository>) {
    let counter = TransitionCounter::wrap(repository);
    let authority = test_authority(counter.clone());
    authority
        .register_credential("racer@chirpy.dev", "pw")
        .await
        .expect("credential registered");
    let session = authority.login("racer@chirpy.dev", "pw").await.expect("login");
    let token = session.refresh_token.token.clone();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let authority = authority.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            authority.revoke(&bearer(&token)).await
        }));
    }

    for handle in handles {
        handle
            .await
            .expect("task joined")
            .expect("every concurrent revoke succeeds");
    }
    assert_eq!(counter.transitions(), 1, "revoked_at should be written once");

    let status = authority
        .refresh_store()
        .status(&token, Utc::now())
        .await
        .expect("status lookup");
    assert_eq!(status, Some(RefreshTokenState::Revoked));
}

#[tokio::test]
async fn memory_store_session_cycle() {
    exercise_session_cycle(Arc::new(MemorySessionRepository::new())).await;
}

#[tokio::test]
async fn memory_store_revoke_all() {
    exercise_revoke_all(Arc::new(MemorySessionRepository::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_concurrent_revoke_has_one_winner() {
    race_revocations(Arc::new(MemorySessionRepository::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_concurrent_session_revokes_all_succeed() {
    race_session_revocations(Arc::new(MemorySessionRepository::new())).await;
}

#[tokio::test]
async fn duplicate_refresh_token_is_a_conflict() {
    let repository = MemorySessionRepository::new();
    let stored = record("dup", Identity::new_v4());
    repository.insert_refresh_token(&stored).await.expect("insert");

    let err = repository
        .insert_refresh_token(&stored)
        .await
        .expect_err("duplicate insert");
    assert!(matches!(err, StoreError::Conflict(_)));
}

async fn postgres_repository() -> Option<(TestDatabase, Arc<dyn SessionRepository>)> {
    match TestDatabase::new_from_env().await {
        Ok(db) => {
            let repository: Arc<dyn SessionRepository> =
                Arc::new(PgSessionRepository::new(db.pool_clone()));
            Some((db, repository))
        }
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping postgres session test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

#[tokio::test]
async fn postgres_store_session_cycle() {
    let Some((db, repository)) = postgres_repository().await else {
        return;
    };
    exercise_session_cycle(repository).await;
    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn postgres_store_revoke_all() {
    let Some((db, repository)) = postgres_repository().await else {
        return;
    };
    exercise_revoke_all(repository).await;
    db.close().await.expect("failed to drop test database");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_store_concurrent_revoke_has_one_winner() {
    let Some((db, repository)) = postgres_repository().await else {
        return;
    };
    race_revocations(repository).await;
    db.close().await.expect("failed to drop test database");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_store_concurrent_session_revokes_all_succeed() {
    let Some((db, repository)) = postgres_repository().await else {
        return;
    };
    race_session_revocations(repository).await;
    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn postgres_store_round_trips_records() {
    let Some((db, repository)) = postgres_repository().await else {
        return;
    };

    let stored = record("pg-round-trip", Identity::new_v4());
    repository.insert_refresh_token(&stored).await.expect("insert");
    let loaded = repository
        .select_refresh_token("pg-round-trip")
        .await
        .expect("select")
        .expect("record present");
    assert_eq!(loaded, stored);

    assert!(
        repository
            .select_refresh_token("missing")
            .await
            .expect("select")
            .is_none()
    );

    db.close().await.expect("failed to drop test database");
}
