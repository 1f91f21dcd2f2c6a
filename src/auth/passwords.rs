use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::auth::config::PasswordParams;
use crate::auth::{AuthError, AuthResult};

const SALT_LEN: usize = 16;

/// Argon2id hashing for stored credentials.
///
/// Comparison is left to [`PasswordVerifier`], which is constant-time with
/// respect to the digest contents.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
    decoy_hash: String,
}

impl PasswordService {
    pub fn new(params: &PasswordParams) -> AuthResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(params.memory_kib);
        builder.t_cost(params.iterations);
        builder.p_cost(params.parallelism);
        let params = builder.build().map_err(AuthError::from)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut service = Self {
            argon2,
            decoy_hash: String::new(),
        };
        let mut decoy = [0u8; 32];
        OsRng.try_fill_bytes(&mut decoy)?;
        service.decoy_hash = service.hash_password(&URL_SAFE_NO_PAD.encode(decoy))?;
        Ok(service)
    }

    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        OsRng.try_fill_bytes(&mut salt_bytes)?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(AuthError::from)?;
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(AuthError::from)?
            .to_string();
        Ok(hash)
    }

    /// Returns `Ok(false)` on mismatch; an unparseable digest is an error.
    pub fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AuthError::from(err)),
        }
    }

    /// Spends one full verification against a digest no caller knows the
    /// secret of, so unknown accounts cost the same as wrong passwords.
    pub fn verify_decoy(&self, password: &str) {
        let _ = self.verify_password(password, &self.decoy_hash);
    }
}
