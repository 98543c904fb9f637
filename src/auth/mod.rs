//! Authentication and authorisation subsystem.
//!
//! Resolves inbound credentials to tenant identities against the remote
//! authority, with TTL caches that keep serving previously validated tenants
//! through authority outages.

pub mod cache;
pub mod extractor;
pub mod gateway;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A `(username, secret)` pair extracted from request headers.
///
/// The secret doubles as the cache key for resolved identities. It must never
/// appear in logs; `Debug` redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Organisation role the authority attaches to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

/// A resolved principal: the tenant org and role behind a credential.
///
/// Field names mirror the authority's JSON. The `secret` field is never on
/// the wire; it is filled in with the presented secret after resolution so a
/// cache entry can be re-stamped under the same key, and it is redacted from
/// `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: i64,
    pub org_id: i64,
    pub org_name: String,
    pub org_slug: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub secret: String,
}

impl Identity {
    /// Built-in identity returned for the static admin key: the sentinel
    /// org 1 with instance-admin rights.
    pub fn admin(secret: String) -> Self {
        Self {
            id: 1,
            org_id: 1,
            org_name: "Admin".to_string(),
            org_slug: "admin".to_string(),
            name: "admin".to_string(),
            role: Role::Admin,
            is_admin: true,
            created_at: Utc::now(),
            secret,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("org_id", &self.org_id)
            .field("org_name", &self.org_name)
            .field("org_slug", &self.org_slug)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("is_admin", &self.is_admin)
            .field("created_at", &self.created_at)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the auth subsystem.
///
/// The HTTP layer maps the first three to 401 and the rest to 500; nothing
/// else escapes this module.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable credential, or the authority rejected it.
    #[error("invalid authentication credentials")]
    Unauthorized,
    /// The credential is valid but its org is not in the allow-list.
    #[error("invalid org id")]
    InvalidOrgId,
    /// The target instance does not exist or belongs to another org.
    #[error("invalid instance id")]
    InvalidInstanceId,
    /// The authority could not be reached and no trusted cache state existed.
    #[error("authority unavailable")]
    AuthorityUnavailable,
    /// Unexpected failure, e.g. an undecodable authority response.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
