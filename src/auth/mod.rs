use crate::AccountId;
use axum::http::HeaderMap;


/// Header carrying the acting member, set by the upstream session layer.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Client apps present their access token this way.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, HeaderError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(HeaderError::Missing("authorization"))?
        .to_str()
        .map_err(|_| HeaderError::InvalidFormat("authorization"))?;

    parse_bearer_token(auth_header)
}

/// Extract the acting member's account id from the `X-Account-Id` header.
pub fn extract_account_id(headers: &HeaderMap) -> Result<AccountId, HeaderError> {
    let value = headers
        .get(ACCOUNT_HEADER)
        .ok_or(HeaderError::Missing(ACCOUNT_HEADER))?
        .to_str()
        .map_err(|_| HeaderError::InvalidFormat(ACCOUNT_HEADER))?
        .trim();

    if value.is_empty() {
        return Err(HeaderError::Empty(ACCOUNT_HEADER));
    }

    value
        .parse::<AccountId>()
        .map_err(|_| HeaderError::InvalidFormat(ACCOUNT_HEADER))
}

/// Parse bearer token from Authorization header value
fn parse_bearer_token(header_value: &str) -> Result<String, HeaderError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(HeaderError::InvalidFormat("authorization"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(HeaderError::InvalidFormat("authorization"));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(HeaderError::Empty("authorization"));
    }

    Ok(token.to_string())
}

/// Credential header extraction errors, naming the offending header
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum HeaderError {
    #[error("{0} header not provided")]
    Missing(&'static str),
    #[error("invalid {0} header format")]
    InvalidFormat(&'static str),
    #[error("{0} header is empty")]
    Empty(&'static str),
}
