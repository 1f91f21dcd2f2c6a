use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::config::MAX_JWT_LEEWAY_SECS;
use crate::auth::{AuthConfig, AuthError, AuthResult, Identity};

/// Header `alg` values accepted on verification. Anything outside the HMAC
/// family (including `none` and the asymmetric algorithms) is refused before
/// the key is consulted.
const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

/// Stateless signer and verifier for short-lived access tokens.
///
/// The secret is fixed at construction and only read afterwards, so one
/// instance is shared across request handlers behind an `Arc`.
pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    leeway_secs: i64,
}

impl AccessTokenCodec {
    pub fn new(secret: &[u8], issuer: impl Into<String>, leeway_secs: u64) -> AuthResult<Self> {
        if leeway_secs > MAX_JWT_LEEWAY_SECS {
            return Err(AuthError::Config(format!(
                "jwt leeway must not exceed {MAX_JWT_LEEWAY_SECS} seconds"
            )));
        }
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_ALGORITHMS.to_vec();
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;
        validation.leeway = leeway_secs;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            leeway_secs: leeway_secs as i64,
        })
    }

    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Config("jwt secret must not be empty".into()));
        }
        Self::new(
            config.jwt_secret.as_bytes(),
            config.issuer.clone(),
            config.jwt_leeway_secs,
        )
    }

    pub fn sign(&self, identity: Identity, ttl: Duration) -> AuthResult<SignedAccessToken> {
        self.sign_at(identity, ttl, Utc::now())
    }

    /// Signs with an explicit issue time; `sign` is this with `Utc::now()`.
    pub fn sign_at(
        &self,
        identity: Identity,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> AuthResult<SignedAccessToken> {
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Config("access token ttl out of range".into()))?;

        let claims = AccessTokenClaims {
            sub: identity.to_string(),
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)?;

        Ok(SignedAccessToken {
            token,
            identity,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> AuthResult<Identity> {
        let claims = self.decode_claims(token)?;
        claims
            .sub
            .parse::<Identity>()
            .map_err(|_| AuthError::MalformedToken)
    }

    pub fn decode_claims(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        ensure_hmac_algorithm(token)?;

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify_jwt_error)?;
        let claims = token_data.claims;

        // `exp` is exclusive: a token is dead in the second it expires.
        let now = Utc::now().timestamp();
        if claims.exp.saturating_add(self.leeway_secs) <= now {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}

fn ensure_hmac_algorithm(token: &str) -> AuthResult<()> {
    let mut segments = token.split('.');
    let header_segment = segments.next().ok_or(AuthError::MalformedToken)?;
    if segments.count() != 2 {
        return Err(AuthError::MalformedToken);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|_| AuthError::MalformedToken)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::MalformedToken)?;
    let alg = header
        .get("alg")
        .and_then(|value| value.as_str())
        .ok_or(AuthError::MalformedToken)?;

    match alg {
        "HS256" | "HS384" | "HS512" => Ok(()),
        _ => Err(AuthError::UnsupportedAlgorithm),
    }
}

fn classify_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::BadSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::UnsupportedAlgorithm
        }
        _ => AuthError::MalformedToken,
    }
}
