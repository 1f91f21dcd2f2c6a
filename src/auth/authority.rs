//! Session orchestration: login, authentication, refresh, revocation and
//! ownership checks on top of the hasher, codec and refresh-token store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rocket::http::HeaderMap;

use crate::auth::credentials::{extract_api_key, extract_bearer};
use crate::auth::jwt::{AccessTokenCodec, SignedAccessToken};
use crate::auth::passwords::PasswordService;
use crate::auth::refresh_store::{IssuedRefreshToken, RefreshTokenStore};
use crate::auth::repository::{CredentialRecord, SessionRepository, bounded};
use crate::auth::{AuthConfig, AuthError, AuthResult, Identity};

/// Result of an ownership check. Denials must be handled explicitly.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
}

impl Access {
    pub fn require(self) -> AuthResult<()> {
        match self {
            Access::Allowed => Ok(()),
            Access::Denied => Err(AuthError::Forbidden),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginSession {
    pub identity: Identity,
    pub access_token: SignedAccessToken,
    pub refresh_token: IssuedRefreshToken,
}

#[derive(Clone)]
pub struct SessionAuthority {
    passwords: Arc<PasswordService>,
    codec: Arc<AccessTokenCodec>,
    refresh_store: RefreshTokenStore,
    repository: Arc<dyn SessionRepository>,
    access_token_ttl: Duration,
    store_timeout: std::time::Duration,
    service_api_key: Option<Arc<str>>,
}

impl SessionAuthority {
    pub fn from_config(
        config: &AuthConfig,
        repository: Arc<dyn SessionRepository>,
    ) -> AuthResult<Self> {
        config.validate()?;
        let store_timeout = std::time::Duration::from_millis(config.store_timeout_ms);
        let refresh_token_ttl = lifetime("refresh token ttl", config.refresh_token_ttl_secs)?;
        let access_token_ttl = lifetime("access token ttl", config.access_token_ttl_secs)?;

        Ok(Self {
            passwords: Arc::new(PasswordService::new(&config.password)?),
            codec: Arc::new(AccessTokenCodec::from_config(config)?),
            refresh_store: RefreshTokenStore::new(
                Arc::clone(&repository),
                refresh_token_ttl,
                store_timeout,
            ),
            repository,
            access_token_ttl,
            store_timeout,
            service_api_key: config.service_api_key.as_deref().map(Arc::from),
        })
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub fn refresh_store(&self) -> &RefreshTokenStore {
        &self.refresh_store
    }

    /// Verifies the password and opens a session. Unknown accounts, wrong
    /// passwords and unreadable stored digests all return
    /// [`AuthError::InvalidCredentials`].
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<LoginSession> {
        let email = normalize_email(email);
        let credential = bounded(
            self.store_timeout,
            self.repository.select_credential_by_email(&email),
        )
        .await?;

        let identity = match credential {
            Some(credential) => {
                if !self.check_password(password, credential.password_hash).await? {
                    log::debug!("login rejected: password mismatch");
                    return Err(AuthError::InvalidCredentials);
                }
                credential.identity
            }
            None => {
                self.burn_password_check(password).await?;
                log::debug!("login rejected: unknown account");
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.open_session(identity, Utc::now()).await
    }

    async fn open_session(&self, identity: Identity, now: DateTime<Utc>) -> AuthResult<LoginSession> {
        let refresh_token = self.refresh_store.issue(identity, now).await?;

        let access_token = match self.codec.sign_at(identity, self.access_token_ttl, now) {
            Ok(token) => token,
            Err(err) => {
                // Never leave a persisted session without the access token it was paired with.
                if let Err(revoke_err) = self.refresh_store.revoke(&refresh_token.token, now).await {
                    log::error!("failed to revoke orphaned refresh token: {revoke_err}");
                }
                return Err(err);
            }
        };

        log::info!("session opened for {identity}");
        Ok(LoginSession {
            identity,
            access_token,
            refresh_token,
        })
    }

    /// Identity asserted by the bearer access token. Codec error kinds pass through.
    pub fn authenticate(&self, headers: &HeaderMap<'_>) -> AuthResult<Identity> {
        let token = extract_bearer(headers)?;
        self.codec.verify(token)
    }

    /// Mints a new access token from a bearer refresh token. The refresh token
    /// itself is left untouched.
    pub async fn refresh(&self, headers: &HeaderMap<'_>) -> AuthResult<SignedAccessToken> {
        let token = extract_bearer(headers)?;
        let now = Utc::now();
        let resolved = self
            .refresh_store
            .resolve(token, now)
            .await
            .map_err(AuthError::into_session_error)?;

        self.codec
            .sign_at(resolved.identity, self.access_token_ttl, now)
    }

    pub async fn revoke(&self, headers: &HeaderMap<'_>) -> AuthResult<()> {
        let token = extract_bearer(headers)?;
        self.refresh_store.revoke(token, Utc::now()).await
    }

    /// Ends every live session of `identity`. Access tokens already handed
    /// out stay valid until they expire.
    pub async fn revoke_all(&self, identity: Identity) -> AuthResult<u64> {
        self.refresh_store.revoke_all(identity, Utc::now()).await
    }

    pub fn authorize(&self, identity: Identity, owner: Identity) -> Access {
        authorize(identity, owner)
    }

    /// Checks an `ApiKey` credential against the configured service key.
    pub fn authenticate_service(&self, headers: &HeaderMap<'_>) -> AuthResult<()> {
        let presented = extract_api_key(headers)?;
        let Some(expected) = self.service_api_key.as_deref() else {
            log::warn!("service key presented but none is configured");
            return Err(AuthError::InvalidApiKey);
        };

        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }

    /// Hashes `password` and stores a credential for a new principal.
    pub async fn register_credential(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let passwords = Arc::clone(&self.passwords);
        let password = password.to_owned();
        let password_hash =
            tokio::task::spawn_blocking(move || passwords.hash_password(&password)).await??;

        let credential = CredentialRecord {
            identity: Identity::new_v4(),
            email: normalize_email(email),
            password_hash,
        };
        bounded(
            self.store_timeout,
            self.repository.insert_credential(&credential),
        )
        .await?;

        Ok(credential.identity)
    }

    // Argon2 is deliberately slow; keep it off the async workers.
    async fn check_password(&self, password: &str, password_hash: String) -> AuthResult<bool> {
        let passwords = Arc::clone(&self.passwords);
        let password = password.to_owned();
        let outcome =
            tokio::task::spawn_blocking(move || passwords.verify_password(&password, &password_hash))
                .await?;

        match outcome {
            Ok(matched) => Ok(matched),
            Err(err) => {
                log::error!("stored password digest could not be checked: {err}");
                Ok(false)
            }
        }
    }

    async fn burn_password_check(&self, password: &str) -> AuthResult<()> {
        let passwords = Arc::clone(&self.passwords);
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || passwords.verify_decoy(&password)).await?;
        Ok(())
    }
}

/// A principal may mutate a resource only if it owns it.
pub fn authorize(identity: Identity, owner: Identity) -> Access {
    if identity == owner {
        Access::Allowed
    } else {
        Access::Denied
    }
}

fn lifetime(name: &str, secs: i64) -> AuthResult<Duration> {
    Duration::try_seconds(secs)
        .ok_or_else(|| AuthError::Config(format!("{name} of {secs}s is out of range")))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Constant-time comparison to avoid timing side-channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}
