//! Metric publishing backends.
//!
//! The gateway terminates authentication; where accepted samples go next
//! sits behind the [`Publisher`] trait. Deployments without a downstream
//! queue run the null publisher, which accepts and drops.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Config, PublisherKind};

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// One ingested sample, as posted by agents.
///
/// `org_id` is overwritten with the authenticated org before publishing;
/// whatever the agent claimed is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub mtype: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "orgId", default)]
    pub org_id: i64,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Hand a batch of samples to the downstream system.
    async fn publish(&self, metrics: &[MetricData]) -> Result<()>;

    /// Stable name for logs and startup messages.
    fn kind(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// Accepts every batch and drops it.
pub struct NullPublisher;

#[async_trait::async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, metrics: &[MetricData]) -> Result<()> {
        debug!(count = metrics.len(), "publishing disabled, dropping batch");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "null"
    }
}

/// Logs every accepted batch at info level. Useful when standing up a
/// new environment before its queue exists.
pub struct LogPublisher;

#[async_trait::async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, metrics: &[MetricData]) -> Result<()> {
        info!(count = metrics.len(), "accepted batch");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured [`Publisher`] implementation.
pub fn build_publisher(config: &Config) -> Box<dyn Publisher> {
    match config.publisher.kind {
        PublisherKind::Null => Box::new(NullPublisher),
        PublisherKind::Log => Box::new(LogPublisher),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sample_parses() {
        let json = r#"{
            "name": "cpu.usage",
            "interval": 10,
            "value": 42.5,
            "unit": "%",
            "time": 1700000000,
            "mtype": "gauge",
            "tags": ["host=web-1", "dc=ams"],
            "orgId": 5
        }"#;

        let sample: MetricData = serde_json::from_str(json).unwrap();
        assert_eq!(sample.name, "cpu.usage");
        assert_eq!(sample.interval, 10);
        assert_eq!(sample.value, 42.5);
        assert_eq!(sample.mtype, "gauge");
        assert_eq!(sample.tags.len(), 2);
        assert_eq!(sample.org_id, 5);
    }

    #[test]
    fn sparse_sample_fills_defaults() {
        let sample: MetricData = serde_json::from_str(r#"{"name": "up"}"#).unwrap();
        assert_eq!(sample.name, "up");
        assert_eq!(sample.interval, 0);
        assert_eq!(sample.value, 0.0);
        assert!(sample.tags.is_empty());
        assert_eq!(sample.org_id, 0);
    }

    #[test]
    fn org_id_uses_wire_name() {
        let sample = MetricData {
            name: "up".to_string(),
            interval: 0,
            value: 1.0,
            unit: String::new(),
            time: 0,
            mtype: String::new(),
            tags: Vec::new(),
            org_id: 7,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"orgId\":7"));
    }

    #[test]
    fn factory_honors_configured_kind() {
        let mut config = Config::default();
        config.publisher.kind = PublisherKind::Null;
        assert_eq!(build_publisher(&config).kind(), "null");

        config.publisher.kind = PublisherKind::Log;
        assert_eq!(build_publisher(&config).kind(), "log");
    }

    #[tokio::test]
    async fn null_publisher_accepts_everything() {
        let publisher = NullPublisher;
        publisher.publish(&[]).await.unwrap();
    }
}
