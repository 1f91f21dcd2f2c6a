//! HTTP surface over [`SessionAuthority`]. Handlers only translate between
//! JSON/headers and the core; status mapping lives in [`crate::error`].

use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

use crate::auth::guards::{AuthUser, RequestHeaders};
use crate::auth::responses::{
    LoginRequest, LoginResponse, RefreshResponse, RevokeResponse, WhoAmIResponse,
};
use crate::auth::SessionAuthority;
use crate::error::ApiError;

type AuthRouteResult<T> = Result<Json<T>, ApiError>;

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    authority: &State<SessionAuthority>,
    payload: Json<LoginRequest>,
) -> AuthRouteResult<LoginResponse> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email and password are required".into(),
        ));
    }

    let session = authority.login(email, &payload.password).await?;

    Ok(Json(LoginResponse {
        identity: session.identity,
        access_token: session.access_token.token,
        access_token_expires_at: session.access_token.expires_at,
        refresh_token: session.refresh_token.token,
        refresh_token_expires_at: session.refresh_token.expires_at,
    }))
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh")]
pub async fn refresh(
    authority: &State<SessionAuthority>,
    headers: RequestHeaders<'_>,
) -> AuthRouteResult<RefreshResponse> {
    let access_token = authority.refresh(headers.0).await?;

    Ok(Json(RefreshResponse {
        access_token: access_token.token,
        access_token_expires_at: access_token.expires_at,
    }))
}

#[openapi(tag = "Auth")]
#[post("/auth/revoke")]
pub async fn revoke(
    authority: &State<SessionAuthority>,
    headers: RequestHeaders<'_>,
) -> AuthRouteResult<RevokeResponse> {
    authority.revoke(headers.0).await?;
    Ok(Json(RevokeResponse { revoked: true }))
}

#[openapi(tag = "Auth")]
#[get("/auth/whoami")]
pub async fn whoami(user: AuthUser) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        identity: user.identity,
    })
}
