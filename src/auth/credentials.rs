//! Pulls bearer tokens and service API keys out of request headers.

use rocket::http::HeaderMap;

use crate::auth::{AuthError, AuthResult};

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const BEARER_SCHEME: &str = "Bearer";
pub const API_KEY_SCHEME: &str = "ApiKey";

/// `Authorization: Bearer <token>`.
pub fn extract_bearer<'h>(headers: &'h HeaderMap<'_>) -> AuthResult<&'h str> {
    extract_scheme(headers, BEARER_SCHEME)
}

/// `Authorization: ApiKey <key>`, used by service-to-service callers.
pub fn extract_api_key<'h>(headers: &'h HeaderMap<'_>) -> AuthResult<&'h str> {
    extract_scheme(headers, API_KEY_SCHEME)
}

fn extract_scheme<'h>(headers: &'h HeaderMap<'_>, expected: &str) -> AuthResult<&'h str> {
    let header = headers
        .get_one(AUTHORIZATION_HEADER)
        .ok_or(AuthError::MissingCredential)?;
    let (scheme, value) = header
        .trim_start()
        .split_once(' ')
        .ok_or(AuthError::MissingCredential)?;
    let value = value.trim();
    if scheme.eq_ignore_ascii_case(expected) && !value.is_empty() {
        Ok(value)
    } else {
        Err(AuthError::MissingCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap<'static> {
        let mut headers = HeaderMap::new();
        headers.add_raw(name, value);
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        let headers = headers("Authorization", "Bearer abc.def.ghi");
        assert_eq!(extract_bearer(&headers).expect("token"), "abc.def.ghi");
    }

    #[test]
    fn header_name_and_scheme_are_case_insensitive() {
        let headers = headers("authorization", "bearer   token-value  ");
        assert_eq!(extract_bearer(&headers).expect("token"), "token-value");
    }

    #[test]
    fn missing_header_is_reported() {
        let headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::MissingCredential)
        ));
    }

    #[test]
    fn empty_value_is_missing() {
        for value in ["Bearer", "Bearer ", "Bearer    ", ""] {
            let headers = headers("Authorization", value);
            assert!(
                matches!(extract_bearer(&headers), Err(AuthError::MissingCredential)),
                "{value:?} should not yield a token"
            );
        }
    }

    #[test]
    fn schemes_do_not_cross() {
        let bearer = headers("Authorization", "Bearer token");
        let api_key = headers("Authorization", "ApiKey f271c81ff7084ee5b99a5091b42d486e");

        assert!(matches!(
            extract_api_key(&bearer),
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            extract_bearer(&api_key),
            Err(AuthError::MissingCredential)
        ));
        assert_eq!(
            extract_api_key(&api_key).expect("key"),
            "f271c81ff7084ee5b99a5091b42d486e"
        );
    }

    #[test]
    fn bare_token_without_scheme_is_rejected() {
        let headers = headers("Authorization", "abc.def.ghi");
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::MissingCredential)
        ));
    }
}
