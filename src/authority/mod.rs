//! Authority client abstraction.
//!
//! The authority is the external service of record for API keys and hosted
//! instances. The [`Authority`] trait carries the two operations the auth
//! gateway consumes; all URL construction and response parsing stays behind
//! it, so the gateway never sees transport detail.

pub mod http;

use crate::auth::Identity;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure modes of a single authority call.
///
/// The client performs no retries and no caching; the degrade policy lives
/// entirely in the gateway.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorityError {
    /// Transport failure, or a status code other than the documented ones.
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    /// The queried instance does not exist (HTTP 404).
    #[error("instance not found")]
    NotFound,
    /// A 200 response whose body could not be decoded.
    #[error("unexpected authority response: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The two authority operations the gateway dispatches through.
#[async_trait::async_trait]
pub trait Authority: Send + Sync {
    /// Validate an API key, returning the identity it belongs to.
    ///
    /// Any non-200 response is reported as unavailability, never as a
    /// verdict on the key itself.
    async fn check_credential(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Identity, AuthorityError>;

    /// Look up a hosted-metrics instance, returning its owning org id.
    async fn check_instance(&self, instance_id: &str) -> Result<i64, AuthorityError>;
}
