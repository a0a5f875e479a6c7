//! Basic Auth credential extractor.
//!
//! The credentials are not verified here; they are the key of the connection
//! cache and are checked by the remote API on login.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use unirest_core::Credentials;

use crate::error::ApiError;

/// Credentials taken from an `Authorization: Basic ...` header.
#[derive(Debug, Clone)]
pub struct BasicCredentials(pub Credentials);

impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let (username, password) = parse_basic_auth(auth_header).map_err(ApiError::unauthorized)?;
        Ok(Self(Credentials::new(username, password)))
    }
}

/// Parse a `Basic <base64(username:password)>` header value.
///
/// Both username and password must be non-empty.
fn parse_basic_auth(header: &str) -> Result<(String, String), String> {
    let credentials = header
        .get(..6)
        .filter(|scheme| scheme.eq_ignore_ascii_case("basic "))
        .map(|_| &header[6..])
        .ok_or_else(|| "Authorization header must start with 'Basic '".to_string())?;

    let decoded = STANDARD
        .decode(credentials.trim())
        .map_err(|_| "Invalid base64 encoding in Authorization header".to_string())?;

    let credentials_str = String::from_utf8(decoded)
        .map_err(|_| "Invalid UTF-8 in decoded credentials".to_string())?;

    let (username, password) = credentials_str
        .split_once(':')
        .ok_or_else(|| "Credentials must be in format 'username:password'".to_string())?;

    if username.is_empty() || password.is_empty() {
        return Err("Username and password must not be empty".to_string());
    }

    Ok((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[test]
    fn parses_valid_header() {
        let (user, pass) = parse_basic_auth(&header("alice:s3cr:et")).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "s3cr:et");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let raw = format!("basic {}", STANDARD.encode("bob:pw"));
        assert_eq!(parse_basic_auth(&raw).unwrap().0, "bob");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = parse_basic_auth("Bearer token").unwrap_err();
        assert!(err.contains("Basic"));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(parse_basic_auth("Basic !!!invalid!!!").is_err());
    }

    #[test]
    fn rejects_missing_colon() {
        let err = parse_basic_auth(&header("no-colon-here")).unwrap_err();
        assert!(err.contains("username:password"));
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(parse_basic_auth(&header(":secret")).is_err());
        assert!(parse_basic_auth(&header("alice:")).is_err());
    }
}
