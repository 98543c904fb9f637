use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AuthorityLabels {
    pub endpoint: String,
    pub outcome: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the gateway.
pub struct Metrics {
    // -- identity cache --
    pub identity_cache_hits: Counter,
    pub identity_cache_misses: Counter,
    pub identity_cache_entries: Gauge,

    // -- instance cache --
    pub instance_cache_hits: Counter,
    pub instance_cache_misses: Counter,
    pub instance_cache_entries: Gauge,

    // -- authority --
    pub authority_requests: Family<AuthorityLabels, Counter>,
    pub stale_identities_served: Counter,

    // -- ingest --
    pub samples_received: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let identity_cache_hits = Counter::default();
        registry.register(
            "metricsgw_identity_cache_hits",
            "Identity cache hits",
            identity_cache_hits.clone(),
        );

        let identity_cache_misses = Counter::default();
        registry.register(
            "metricsgw_identity_cache_misses",
            "Identity cache misses (absent or expired entries)",
            identity_cache_misses.clone(),
        );

        let identity_cache_entries: Gauge = Gauge::default();
        registry.register(
            "metricsgw_identity_cache_entries",
            "Identities currently cached, fresh or stale",
            identity_cache_entries.clone(),
        );

        let instance_cache_hits = Counter::default();
        registry.register(
            "metricsgw_instance_cache_hits",
            "Instance-ownership cache hits",
            instance_cache_hits.clone(),
        );

        let instance_cache_misses = Counter::default();
        registry.register(
            "metricsgw_instance_cache_misses",
            "Instance-ownership cache misses (absent or expired entries)",
            instance_cache_misses.clone(),
        );

        let instance_cache_entries: Gauge = Gauge::default();
        registry.register(
            "metricsgw_instance_cache_entries",
            "Instance-ownership facts currently cached, fresh or stale",
            instance_cache_entries.clone(),
        );

        let authority_requests = Family::<AuthorityLabels, Counter>::default();
        registry.register(
            "metricsgw_authority_requests",
            "Authority API calls by endpoint and outcome",
            authority_requests.clone(),
        );

        let stale_identities_served = Counter::default();
        registry.register(
            "metricsgw_stale_identities_served",
            "Expired cache entries served because the authority was unavailable",
            stale_identities_served.clone(),
        );

        let samples_received = Counter::default();
        registry.register(
            "metricsgw_samples_received",
            "Metric samples accepted for publishing",
            samples_received.clone(),
        );

        Self {
            identity_cache_hits,
            identity_cache_misses,
            identity_cache_entries,
            instance_cache_hits,
            instance_cache_misses,
            instance_cache_entries,
            authority_requests,
            stale_identities_served,
            samples_received,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`].
///
/// [`AppState`]: crate::AppState
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all gateway metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }
}
