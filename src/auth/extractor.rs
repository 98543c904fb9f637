//! Credential extraction from inbound request headers.

use axum::http::{header, HeaderMap};
use base64::Engine as _;

use crate::auth::{AuthError, Credential};

/// Vendor API-key header, sent by agents that cannot set `Authorization`.
pub const API_KEY_HEADER: &str = "Dd-Api-Key";

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Pull a credential out of the request headers.
///
/// Schemes are tried in priority order: HTTP Basic, then Bearer, then the
/// vendor API-key header. A scheme that is present but unparseable falls
/// through to the next. Whichever scheme matched, an empty secret is
/// rejected here so the gateway only ever sees usable credentials.
pub fn extract_credential(headers: &HeaderMap) -> Result<Credential, AuthError> {
    let credential = basic_credential(headers)
        .or_else(|| bearer_credential(headers))
        .or_else(|| api_key_credential(headers))
        .ok_or(AuthError::Unauthorized)?;

    if credential.secret.is_empty() {
        return Err(AuthError::Unauthorized);
    }
    Ok(credential)
}

/// `Authorization: Basic <base64("user:pass")>`.
fn basic_credential(headers: &HeaderMap) -> Option<Credential> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.strip_prefix("Basic ")?.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())?;
    let (username, secret) = decoded.split_once(':')?;
    Some(Credential {
        username: username.to_string(),
        secret: secret.to_string(),
    })
}

/// `Authorization: Bearer <token>`. The authority expects `api_key` as the
/// username for token-style credentials.
fn bearer_credential(headers: &HeaderMap) -> Option<Credential> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    Some(Credential {
        username: "api_key".to_string(),
        secret: token.to_string(),
    })
}

/// `Dd-Api-Key: <user>:<key>` or a bare `<key>`. A value with no delimiter,
/// or with nothing after it, is treated as a bare key.
fn api_key_credential(headers: &HeaderMap) -> Option<Credential> {
    let value = headers.get(API_KEY_HEADER)?.to_str().ok()?;
    let (username, secret) = match value.split_once(':') {
        Some((username, secret)) if !secret.is_empty() => (username, secret),
        Some((secret, _)) => ("api_key", secret),
        None => ("api_key", value),
    };
    Some(Credential {
        username: username.to_string(),
        secret: secret.to_string(),
    })
}
