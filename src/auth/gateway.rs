//! Credential resolution and instance-ownership policy.
//!
//! One [`AuthGateway`] is constructed at startup and shared by handle. It
//! owns the identity and instance caches plus the authority client, and it
//! alone decides when stale cache state may stand in for the authority.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::auth::cache::{Lookup, TtlCache};
use crate::auth::{AuthError, Credential, Identity};
use crate::authority::{Authority, AuthorityError};
use crate::config::AuthConfig;
use crate::metrics::{AuthorityLabels, MetricsRegistry};

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct AuthGateway {
    authority: Arc<dyn Authority>,
    identities: TtlCache<Identity>,
    instances: TtlCache<bool>,
    admin_key: Option<String>,
    valid_org_ids: Vec<i64>,
    identity_ttl: Duration,
    instance_ttl: Duration,
    metrics: MetricsRegistry,
}

impl AuthGateway {
    pub fn new(
        authority: Arc<dyn Authority>,
        admin_key: Option<String>,
        config: &AuthConfig,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            authority,
            identities: TtlCache::new(),
            instances: TtlCache::new(),
            admin_key: admin_key.filter(|key| !key.is_empty()),
            valid_org_ids: config.valid_org_ids.clone(),
            identity_ttl: Duration::from_secs(config.identity_cache_ttl),
            instance_ttl: Duration::from_secs(config.instance_cache_ttl),
            metrics,
        }
    }

    /// Resolve a credential to a tenant identity.
    ///
    /// Fresh cache entries short-circuit; absent or expired entries go to the
    /// authority. When the authority is unavailable, an expired entry is
    /// re-stamped and served rather than revoking a known tenant; with no
    /// entry at all the failure propagates.
    pub async fn authenticate(&self, credential: &Credential) -> Result<Identity, AuthError> {
        // 1. Static admin key, checked before cache and authority.
        if let Some(ref admin_key) = self.admin_key {
            if credential.secret == *admin_key {
                return Ok(Identity::admin(admin_key.clone()));
            }
        }

        // 2. Cache lookup by secret. Only positive results are ever cached.
        let stale = match self.identities.get(&credential.secret) {
            Lookup::Fresh(identity) => {
                self.metrics.metrics.identity_cache_hits.inc();
                return Ok(identity);
            }
            Lookup::Stale(identity) => Some(identity),
            Lookup::Miss => None,
        };
        self.metrics.metrics.identity_cache_misses.inc();

        // 3. Ask the authority. The cache lock is not held across this await;
        //    concurrent misses for one key may each reach the authority.
        let result = self
            .authority
            .check_credential(&credential.username, &credential.secret)
            .await;
        self.record_authority_call("api-keys-check", outcome(&result));

        match result {
            Ok(mut identity) => {
                if !self.org_allowed(identity.org_id) {
                    warn!(org_id = identity.org_id, "org not in allow-list, rejecting key");
                    return Err(AuthError::InvalidOrgId);
                }
                identity.secret = credential.secret.clone();
                self.store_identity(&credential.secret, identity.clone());
                Ok(identity)
            }
            Err(AuthorityError::Unavailable(reason)) => match stale {
                Some(identity) => {
                    warn!(
                        %reason,
                        org_id = identity.org_id,
                        "authority unavailable, serving stale identity"
                    );
                    self.metrics.metrics.stale_identities_served.inc();
                    self.store_identity(&credential.secret, identity.clone());
                    Ok(identity)
                }
                None => {
                    warn!(%reason, "authority unavailable and credential unknown");
                    Err(AuthError::AuthorityUnavailable)
                }
            },
            Err(err) => Err(AuthError::Internal(err.into())),
        }
    }

    /// Verify that `instance_id` belongs to the identity's org.
    ///
    /// Same shape as [`AuthGateway::authenticate`]: fresh ownership facts
    /// short-circuit, the authority settles misses, and stale facts survive
    /// an authority outage. Only `true` is ever stored.
    pub async fn check_instance(
        &self,
        identity: &Identity,
        instance_id: &str,
    ) -> Result<(), AuthError> {
        let key = format!("{}-{}", identity.org_slug, instance_id);

        let stale = match self.instances.get(&key) {
            Lookup::Fresh(true) => {
                self.metrics.metrics.instance_cache_hits.inc();
                return Ok(());
            }
            Lookup::Stale(true) => Some(true),
            _ => None,
        };
        self.metrics.metrics.instance_cache_misses.inc();

        let result = self.authority.check_instance(instance_id).await;
        self.record_authority_call("hosted-metrics", outcome(&result));

        match result {
            Ok(org_id) if org_id == identity.org_id => {
                self.store_ownership(&key);
                Ok(())
            }
            Ok(org_id) => {
                warn!(
                    instance_id,
                    owner_org = org_id,
                    caller_org = identity.org_id,
                    "instance owned by another org"
                );
                Err(AuthError::InvalidInstanceId)
            }
            Err(AuthorityError::NotFound) => {
                debug!(instance_id, "instance not found");
                Err(AuthError::InvalidInstanceId)
            }
            Err(AuthorityError::Unavailable(reason)) => {
                if stale.is_some() {
                    warn!(
                        %reason,
                        instance_id, "authority unavailable, trusting stale instance ownership"
                    );
                    self.store_ownership(&key);
                    Ok(())
                } else {
                    warn!(
                        %reason,
                        instance_id, "authority unavailable and instance ownership unknown"
                    );
                    Err(AuthError::AuthorityUnavailable)
                }
            }
            Err(err) => Err(AuthError::Internal(err.into())),
        }
    }

    /// An empty allow-list admits every org.
    fn org_allowed(&self, org_id: i64) -> bool {
        self.valid_org_ids.is_empty() || self.valid_org_ids.contains(&org_id)
    }

    fn store_identity(&self, secret: &str, identity: Identity) {
        self.identities.set(secret, identity, self.identity_ttl);
        self.metrics
            .metrics
            .identity_cache_entries
            .set(self.identities.len() as i64);
    }

    fn store_ownership(&self, key: &str) {
        self.instances.set(key, true, self.instance_ttl);
        self.metrics
            .metrics
            .instance_cache_entries
            .set(self.instances.len() as i64);
    }

    fn record_authority_call(&self, endpoint: &str, outcome: &str) {
        self.metrics
            .metrics
            .authority_requests
            .get_or_create(&AuthorityLabels {
                endpoint: endpoint.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }
}

fn outcome<T>(result: &Result<T, AuthorityError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(AuthorityError::Unavailable(_)) => "unavailable",
        Err(AuthorityError::NotFound) => "not_found",
        Err(AuthorityError::Protocol(_)) => "protocol_error",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::auth::Role;

    // ── Scripted authority ───────────────────────────────────────────

    /// In-memory authority whose responses are set per test and whose call
    /// counts prove whether the cache short-circuited.
    struct ScriptedAuthority {
        credential_response: Mutex<Result<Identity, AuthorityError>>,
        instance_response: Mutex<Result<i64, AuthorityError>>,
        credential_calls: AtomicUsize,
        instance_calls: AtomicUsize,
    }

    impl ScriptedAuthority {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                credential_response: Mutex::new(Err(AuthorityError::Unavailable(
                    "no script".to_string(),
                ))),
                instance_response: Mutex::new(Err(AuthorityError::Unavailable(
                    "no script".to_string(),
                ))),
                credential_calls: AtomicUsize::new(0),
                instance_calls: AtomicUsize::new(0),
            })
        }

        fn script_credential(&self, response: Result<Identity, AuthorityError>) {
            *self.credential_response.lock().unwrap() = response;
        }

        fn script_instance(&self, response: Result<i64, AuthorityError>) {
            *self.instance_response.lock().unwrap() = response;
        }

        fn credential_calls(&self) -> usize {
            self.credential_calls.load(Ordering::SeqCst)
        }

        fn instance_calls(&self) -> usize {
            self.instance_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Authority for ScriptedAuthority {
        async fn check_credential(
            &self,
            _username: &str,
            _secret: &str,
        ) -> Result<Identity, AuthorityError> {
            self.credential_calls.fetch_add(1, Ordering::SeqCst);
            self.credential_response.lock().unwrap().clone()
        }

        async fn check_instance(&self, _instance_id: &str) -> Result<i64, AuthorityError> {
            self.instance_calls.fetch_add(1, Ordering::SeqCst);
            self.instance_response.lock().unwrap().clone()
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn editor_identity(org_id: i64) -> Identity {
        Identity {
            id: 7,
            org_id,
            org_name: "Acme".to_string(),
            org_slug: "acme".to_string(),
            name: "ingest-key".to_string(),
            role: Role::Editor,
            is_admin: false,
            created_at: Utc::now(),
            secret: String::new(),
        }
    }

    fn credential(secret: &str) -> Credential {
        Credential {
            username: "api_key".to_string(),
            secret: secret.to_string(),
        }
    }

    fn gateway_with(
        authority: Arc<ScriptedAuthority>,
        admin_key: Option<&str>,
        valid_org_ids: Vec<i64>,
    ) -> AuthGateway {
        let config = AuthConfig {
            valid_org_ids,
            ..AuthConfig::default()
        };
        AuthGateway::new(
            authority,
            admin_key.map(str::to_string),
            &config,
            MetricsRegistry::new(),
        )
    }

    // ── Admin shortcut ───────────────────────────────────────────────

    #[tokio::test]
    async fn admin_key_bypasses_cache_and_authority() {
        let authority = ScriptedAuthority::new();
        let gateway = gateway_with(Arc::clone(&authority), Some("master-key"), vec![]);

        let identity = gateway
            .authenticate(&credential("master-key"))
            .await
            .unwrap();

        assert!(identity.is_admin);
        assert_eq!(identity.org_id, 1);
        assert_eq!(identity.org_name, "Admin");
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.secret, "master-key");
        assert_eq!(authority.credential_calls(), 0);
    }

    #[tokio::test]
    async fn empty_admin_key_never_matches() {
        let authority = ScriptedAuthority::new();
        let gateway = gateway_with(Arc::clone(&authority), Some(""), vec![]);

        // With the shortcut disabled the empty secret goes to the authority,
        // which is down, and there is nothing cached to fall back on.
        let err = gateway.authenticate(&credential("")).await.unwrap_err();

        assert!(matches!(err, AuthError::AuthorityUnavailable));
        assert_eq!(authority.credential_calls(), 1);
    }

    // ── Cache short-circuit ──────────────────────────────────────────

    #[tokio::test]
    async fn fresh_cache_hit_skips_authority() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Ok(editor_identity(2)));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let first = gateway.authenticate(&credential("s3cret")).await.unwrap();

        // The authority now fails; the cached identity must still be served
        // without another call.
        authority.script_credential(Err(AuthorityError::Unavailable("down".to_string())));
        let second = gateway.authenticate(&credential("s3cret")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(authority.credential_calls(), 1);
        assert_eq!(gateway.metrics.metrics.identity_cache_hits.get(), 1);
    }

    #[tokio::test]
    async fn resolved_identity_is_rekeyed_to_presented_secret() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Ok(editor_identity(2)));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let identity = gateway.authenticate(&credential("s3cret")).await.unwrap();

        assert_eq!(identity.secret, "s3cret");
    }

    // ── Eligibility ──────────────────────────────────────────────────

    #[tokio::test]
    async fn org_outside_allowlist_is_rejected_and_not_cached() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Ok(editor_identity(2)));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![3, 4, 5]);

        let err = gateway
            .authenticate(&credential("s3cret"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrgId));

        // Nothing was cached: with the authority down the same secret now
        // fails closed instead of being served from a leftover entry.
        authority.script_credential(Err(AuthorityError::Unavailable("down".to_string())));
        let err = gateway
            .authenticate(&credential("s3cret"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthorityUnavailable));
        assert_eq!(authority.credential_calls(), 2);
    }

    #[tokio::test]
    async fn org_inside_allowlist_is_admitted() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Ok(editor_identity(2)));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![1, 2, 3]);

        let identity = gateway.authenticate(&credential("s3cret")).await.unwrap();
        assert_eq!(identity.org_id, 2);
    }

    #[tokio::test]
    async fn empty_allowlist_admits_every_org() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Ok(editor_identity(9999)));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let identity = gateway.authenticate(&credential("s3cret")).await.unwrap();
        assert_eq!(identity.org_id, 9999);
    }

    // ── Degrade policy ───────────────────────────────────────────────

    #[tokio::test]
    async fn expired_entry_is_refreshed_from_authority() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Ok(editor_identity(2)));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let mut cached = editor_identity(2);
        cached.secret = "old".to_string();
        gateway.identities.set("s3cret", cached, Duration::ZERO);

        let identity = gateway.authenticate(&credential("s3cret")).await.unwrap();

        assert_eq!(identity.secret, "s3cret");
        assert_eq!(authority.credential_calls(), 1);
        assert!(matches!(
            gateway.identities.get("s3cret"),
            Lookup::Fresh(_)
        ));
    }

    #[tokio::test]
    async fn stale_identity_served_when_authority_is_down() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Err(AuthorityError::Unavailable("503".to_string())));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let mut cached = editor_identity(2);
        cached.secret = "s3cret".to_string();
        gateway
            .identities
            .set("s3cret", cached.clone(), Duration::ZERO);

        let identity = gateway.authenticate(&credential("s3cret")).await.unwrap();

        assert_eq!(identity, cached);
        assert_eq!(authority.credential_calls(), 1);
        assert_eq!(gateway.metrics.metrics.stale_identities_served.get(), 1);
        // The entry was re-stamped: the next call is a plain cache hit.
        assert!(matches!(
            gateway.identities.get("s3cret"),
            Lookup::Fresh(_)
        ));
        let again = gateway.authenticate(&credential("s3cret")).await.unwrap();
        assert_eq!(again, cached);
        assert_eq!(authority.credential_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_credential_with_authority_down_fails_closed() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Err(AuthorityError::Unavailable(
            "connection refused".to_string(),
        )));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let err = gateway
            .authenticate(&credential("never-seen"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::AuthorityUnavailable));
    }

    #[tokio::test]
    async fn protocol_error_is_internal_not_unauthorized() {
        let authority = ScriptedAuthority::new();
        authority.script_credential(Err(AuthorityError::Protocol("bad json".to_string())));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let err = gateway
            .authenticate(&credential("s3cret"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Internal(_)));
    }

    // ── Instance ownership ───────────────────────────────────────────

    #[tokio::test]
    async fn owned_instance_is_cached_under_slug_and_id() {
        let authority = ScriptedAuthority::new();
        authority.script_instance(Ok(2));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);
        let identity = editor_identity(2);

        gateway.check_instance(&identity, "10").await.unwrap();
        assert_eq!(gateway.instances.get("acme-10"), Lookup::Fresh(true));

        // Second check is served from cache even though the authority is
        // now unreachable.
        authority.script_instance(Err(AuthorityError::Unavailable("down".to_string())));
        gateway.check_instance(&identity, "10").await.unwrap();
        assert_eq!(authority.instance_calls(), 1);
    }

    #[tokio::test]
    async fn instance_owned_by_another_org_is_rejected_and_not_cached() {
        let authority = ScriptedAuthority::new();
        authority.script_instance(Ok(3));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);
        let identity = editor_identity(2);

        let err = gateway.check_instance(&identity, "10").await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidInstanceId));
        assert_eq!(gateway.instances.get("acme-10"), Lookup::Miss);
    }

    #[tokio::test]
    async fn missing_instance_is_rejected() {
        let authority = ScriptedAuthority::new();
        authority.script_instance(Err(AuthorityError::NotFound));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let err = gateway
            .check_instance(&editor_identity(2), "99")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidInstanceId));
    }

    #[tokio::test]
    async fn stale_ownership_survives_authority_outage() {
        let authority = ScriptedAuthority::new();
        authority.script_instance(Err(AuthorityError::Unavailable("down".to_string())));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);
        let identity = editor_identity(2);

        gateway.instances.set("acme-10", true, Duration::ZERO);

        gateway.check_instance(&identity, "10").await.unwrap();
        assert_eq!(gateway.instances.get("acme-10"), Lookup::Fresh(true));
    }

    #[tokio::test]
    async fn unknown_ownership_with_authority_down_fails_closed() {
        let authority = ScriptedAuthority::new();
        authority.script_instance(Err(AuthorityError::Unavailable("down".to_string())));
        let gateway = gateway_with(Arc::clone(&authority), None, vec![]);

        let err = gateway
            .check_instance(&editor_identity(2), "10")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::AuthorityUnavailable));
    }
}
