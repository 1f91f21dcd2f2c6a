use rocket::Request;
use rocket::State;
use rocket::http::HeaderMap;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};

use crate::auth::{AuthError, AuthResult, Identity, SessionAuthority};
use crate::error::status_for;

/// Caller authenticated by a bearer access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub identity: Identity,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let result = match session_authority(request).await {
            Ok(authority) => authority.authenticate(request.headers()),
            Err(err) => Err(err),
        };

        match result {
            Ok(identity) => Outcome::Success(AuthUser { identity }),
            Err(err) => {
                log::debug!("access token rejected: {err}");
                Outcome::Error((status_for(&err), err))
            }
        }
    }
}

/// Service-to-service caller holding the configured API key.
#[derive(Debug, Clone, Copy)]
pub struct ServiceCaller;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ServiceCaller {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let result = match session_authority(request).await {
            Ok(authority) => authority.authenticate_service(request.headers()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Outcome::Success(ServiceCaller),
            Err(err) => Outcome::Error((status_for(&err), err)),
        }
    }
}

/// Raw request headers, for handlers that pass them straight to the
/// [`SessionAuthority`] (refresh and revoke read the refresh token from
/// `Authorization`).
#[derive(Debug, Clone, Copy)]
pub struct RequestHeaders<'r>(pub &'r HeaderMap<'r>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestHeaders<'r> {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RequestHeaders(request.headers()))
    }
}

async fn session_authority<'r>(request: &'r Request<'_>) -> AuthResult<&'r SessionAuthority> {
    request
        .guard::<&State<SessionAuthority>>()
        .await
        .succeeded()
        .map(|state| state.inner())
        .ok_or_else(|| AuthError::Config("SessionAuthority missing from state".into()))
}

impl<'r> OpenApiFromRequest<'r> for AuthUser {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

impl<'r> OpenApiFromRequest<'r> for ServiceCaller {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

impl<'r> OpenApiFromRequest<'r> for RequestHeaders<'r> {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
