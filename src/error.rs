use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;

use crate::auth::AuthError;

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Transport status for each core failure kind.
pub fn status_for(err: &AuthError) -> Status {
    match err {
        AuthError::InvalidCredentials
        | AuthError::MissingCredential
        | AuthError::BadSignature
        | AuthError::Expired
        | AuthError::Revoked
        | AuthError::NotFound
        | AuthError::InvalidSession
        | AuthError::InvalidApiKey => Status::Unauthorized,
        AuthError::MalformedToken | AuthError::UnsupportedAlgorithm => Status::BadRequest,
        AuthError::Forbidden => Status::Forbidden,
        AuthError::Persistence(_) => Status::ServiceUnavailable,
        AuthError::PasswordHash(_)
        | AuthError::Signing(_)
        | AuthError::Entropy(_)
        | AuthError::Task(_)
        | AuthError::Config(_) => Status::InternalServerError,
    }
}

/// Short wire message for each core failure kind. Never carries internal detail.
pub fn public_message(err: &AuthError) -> &'static str {
    match err {
        AuthError::InvalidCredentials => "incorrect email or password",
        AuthError::MissingCredential => "missing credentials",
        AuthError::MalformedToken => "malformed token",
        AuthError::UnsupportedAlgorithm => "unsupported token algorithm",
        AuthError::BadSignature => "invalid token",
        AuthError::Expired => "token expired",
        AuthError::Revoked | AuthError::NotFound | AuthError::InvalidSession => "invalid session",
        AuthError::InvalidApiKey => "invalid api key",
        AuthError::Forbidden => "forbidden",
        AuthError::Persistence(_) => "service temporarily unavailable",
        _ => "internal error",
    }
}

fn error_kind(err: &AuthError) -> &'static str {
    match err {
        AuthError::InvalidCredentials => "InvalidCredentials",
        AuthError::MissingCredential => "MissingCredential",
        AuthError::MalformedToken => "MalformedToken",
        AuthError::UnsupportedAlgorithm => "UnsupportedAlgorithm",
        AuthError::BadSignature => "BadSignature",
        AuthError::Expired => "Expired",
        AuthError::Revoked | AuthError::NotFound | AuthError::InvalidSession => "InvalidSession",
        AuthError::InvalidApiKey => "InvalidApiKey",
        AuthError::Forbidden => "Forbidden",
        AuthError::Persistence(_) => "Unavailable",
        _ => "InternalError",
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Auth(err) => status_for(err),
            ApiError::BadRequest(_) => Status::BadRequest,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let (error_type, message) = match self {
            ApiError::Auth(err) => {
                if err.is_internal() {
                    log::error!("auth failure: {}", err);
                } else {
                    log::debug!("auth rejected: {}", err);
                }
                (error_kind(&err), public_message(&err).to_string())
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                ("BadRequest", msg)
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        Ok(Responses::default())
    }
}
