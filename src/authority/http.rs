//! Reqwest-backed [`Authority`] implementation.

use serde::Deserialize;
use tracing::warn;

use crate::auth::Identity;
use crate::config::AuthorityConfig;

use super::{Authority, AuthorityError};

// ---------------------------------------------------------------------------
// Client struct
// ---------------------------------------------------------------------------

pub struct HttpAuthority {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpAuthority {
    pub fn new(config: &AuthorityConfig, http_client: reqwest::Client) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// The instance document also carries an `id` field; only the owner matters
/// here, so the rest is ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceInfo {
    org_id: i64,
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Authority for HttpAuthority {
    async fn check_credential(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Identity, AuthorityError> {
        let url = format!("{}/api/api-keys/check", self.base_url);

        let resp = self
            .http_client
            .post(&url)
            .basic_auth(username, Some(secret))
            .send()
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            warn!(%status, "authority returned non-200 for api key check");
            return Err(AuthorityError::Unavailable(format!(
                "api-keys/check returned {status}"
            )));
        }

        let identity: Identity = resp
            .json()
            .await
            .map_err(|e| AuthorityError::Protocol(e.to_string()))?;

        Ok(identity)
    }

    async fn check_instance(&self, instance_id: &str) -> Result<i64, AuthorityError> {
        let url = format!("{}/api/hosted-metrics/{}", self.base_url, instance_id);

        let resp = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthorityError::NotFound);
        }
        if status != reqwest::StatusCode::OK {
            warn!(%status, instance_id, "authority returned non-200 for instance lookup");
            return Err(AuthorityError::Unavailable(format!(
                "hosted-metrics/{instance_id} returned {status}"
            )));
        }

        let info: InstanceInfo = resp
            .json()
            .await
            .map_err(|e| AuthorityError::Protocol(e.to_string()))?;

        Ok(info.org_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
