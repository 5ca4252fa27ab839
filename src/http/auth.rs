//! HTTP Basic authentication (RFC 7617).
//!
//! Parses credentials from the `Authorization` header. Checking them is left
//! to the application; [`BasicCredentials`] also works as an extractor that
//! answers 401 with a `WWW-Authenticate` challenge when credentials are
//! missing or malformed.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const BASIC_PREFIX: &[u8] = b"Basic ";

/// User name and password from a Basic `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

/// The raw `Authorization` header value, if present and non-empty.
pub fn authorization_header(headers: &HeaderMap) -> Option<&[u8]> {
    headers
        .get(header::AUTHORIZATION)
        .map(HeaderValue::as_bytes)
        .filter(|value| !value.is_empty())
}

/// Decode a `Basic <base64(user:password)>` payload.
///
/// The password may itself contain colons; only the first one separates it
/// from the user name.
pub fn basic_auth(payload: &[u8]) -> Option<BasicCredentials> {
    let encoded = payload.strip_prefix(BASIC_PREFIX)?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;

    Some(BasicCredentials {
        user: user.to_string(),
        password: password.to_string(),
    })
}

impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authorization_header(&parts.headers)
            .and_then(basic_auth)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Basic")],
                    "authentication required",
                )
                    .into_response()
            })
    }
}
