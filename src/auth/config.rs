use std::fmt;
use std::str::FromStr;

use crate::auth::{AuthError, AuthResult};

pub const DEFAULT_ISSUER: &str = "chirpy";
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 60 * 24 * 60 * 60;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
pub const MAX_TOKEN_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;
pub const MAX_JWT_LEEWAY_SECS: u64 = 24 * 60 * 60;

/// Argon2id cost parameters applied to newly hashed passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024, // 19 MiB
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl PasswordParams {
    /// Defaults overridden by `CHIRPY_ARGON2_*` variables.
    pub fn from_env() -> AuthResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            memory_kib: env_or("CHIRPY_ARGON2_M_COST_KIB", defaults.memory_kib)?,
            iterations: env_or("CHIRPY_ARGON2_T_COST", defaults.iterations)?,
            parallelism: env_or("CHIRPY_ARGON2_P_COST", defaults.parallelism)?,
        })
    }
}

/// Authentication configuration loaded from environment variables.
#[derive(Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub jwt_secret: String,
    pub jwt_leeway_secs: u64,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub store_timeout_ms: u64,
    pub password: PasswordParams,
    pub service_api_key: Option<String>,
}

impl AuthConfig {
    /// Configuration with default lifetimes and costs around the given signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            issuer: DEFAULT_ISSUER.into(),
            jwt_secret: jwt_secret.into(),
            jwt_leeway_secs: 0,
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            password: PasswordParams::default(),
            service_api_key: None,
        }
    }

    pub fn from_env() -> AuthResult<Self> {
        let jwt_secret = std::env::var("CHIRPY_JWT_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AuthError::Config("CHIRPY_JWT_SECRET is required".into()))?;

        let mut config = Self::new(jwt_secret);
        if let Ok(issuer) = std::env::var("CHIRPY_JWT_ISSUER") {
            config.issuer = issuer;
        }
        config.jwt_leeway_secs = env_or("CHIRPY_JWT_LEEWAY_SECS", config.jwt_leeway_secs)?;
        config.access_token_ttl_secs =
            env_or("CHIRPY_ACCESS_TOKEN_TTL_SECS", config.access_token_ttl_secs)?;
        config.refresh_token_ttl_secs =
            env_or("CHIRPY_REFRESH_TOKEN_TTL_SECS", config.refresh_token_ttl_secs)?;
        config.store_timeout_ms = env_or("CHIRPY_STORE_TIMEOUT_MS", config.store_timeout_ms)?;
        config.password = PasswordParams::from_env()?;
        config.service_api_key = std::env::var("CHIRPY_POLKA_KEY")
            .ok()
            .filter(|value| !value.is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.jwt_secret.is_empty() {
            return Err(AuthError::Config("jwt secret must not be empty".into()));
        }
        if self.issuer.is_empty() {
            return Err(AuthError::Config("jwt issuer must not be empty".into()));
        }
        for (name, ttl) in [
            ("access token ttl", self.access_token_ttl_secs),
            ("refresh token ttl", self.refresh_token_ttl_secs),
        ] {
            if !(1..=MAX_TOKEN_TTL_SECS).contains(&ttl) {
                return Err(AuthError::Config(format!(
                    "{name} must be between 1 and {MAX_TOKEN_TTL_SECS} seconds"
                )));
            }
        }
        if self.jwt_leeway_secs > MAX_JWT_LEEWAY_SECS {
            return Err(AuthError::Config(format!(
                "jwt leeway must not exceed {MAX_JWT_LEEWAY_SECS} seconds"
            )));
        }
        if self.store_timeout_ms == 0 {
            return Err(AuthError::Config("store timeout must be positive".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("jwt_secret", &"**redacted**")
            .field("jwt_leeway_secs", &self.jwt_leeway_secs)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("password", &self.password)
            .field(
                "service_api_key",
                &self.service_api_key.as_ref().map(|_| "**redacted**"),
            )
            .finish()
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> AuthResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AuthError::Config(format!("{name} has an invalid value"))),
        Err(_) => Ok(default),
    }
}
