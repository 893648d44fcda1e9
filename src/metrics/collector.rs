// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Pool metrics, by discover label
    pub resources: IntGaugeVec,
    pub resources_unhealthy: IntGaugeVec,
    pub no_resources_total: IntCounterVec,
    pub updates_total: IntCounterVec,

    // Backend metrics, by resource address
    pub backend_conns_total: IntCounterVec,
    pub backend_conn_errors_total: IntCounterVec,
    pub backend_unhealthy_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let resources = IntGaugeVec::new(
            Opts::new("discover_resources", "Resources in the published snapshot"),
            &["label"],
        )?;
        registry.register(Box::new(resources.clone()))?;

        let resources_unhealthy = IntGaugeVec::new(
            Opts::new(
                "discover_resources_unhealthy",
                "Unhealthy resources in the published snapshot",
            ),
            &["label"],
        )?;
        registry.register(Box::new(resources_unhealthy.clone()))?;

        let no_resources_total = IntCounterVec::new(
            Opts::new(
                "discover_no_resources_total",
                "Selections that found no healthy resource",
            ),
            &["label"],
        )?;
        registry.register(Box::new(no_resources_total.clone()))?;

        let updates_total = IntCounterVec::new(
            Opts::new(
                "discover_updates_total",
                "Address lists received from discovery sources",
            ),
            &["label", "source"],
        )?;
        registry.register(Box::new(updates_total.clone()))?;

        let backend_conns_total = IntCounterVec::new(
            Opts::new("discover_backend_conns_total", "Connections to the backend"),
            &["host"],
        )?;
        registry.register(Box::new(backend_conns_total.clone()))?;

        let backend_conn_errors_total = IntCounterVec::new(
            Opts::new(
                "discover_backend_conn_errors_total",
                "Connection errors to the backend",
            ),
            &["host", "kind"],
        )?;
        registry.register(Box::new(backend_conn_errors_total.clone()))?;

        let backend_unhealthy_total = IntCounterVec::new(
            Opts::new(
                "discover_backend_unhealthy_total",
                "Healthy to unhealthy transitions of the backend",
            ),
            &["host"],
        )?;
        registry.register(Box::new(backend_unhealthy_total.clone()))?;

        Ok(Self {
            resources,
            resources_unhealthy,
            no_resources_total,
            updates_total,
            backend_conns_total,
            backend_conn_errors_total,
            backend_unhealthy_total,
        })
    }

    /// Collector registered against a private registry, for callers that do
    /// not export metrics.
    pub fn detached() -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(&Registry::new())?))
    }

    pub fn update_pool_counts(&self, label: &str, total: usize, unhealthy: usize) {
        self.resources.with_label_values(&[label]).set(total as i64);
        self.resources_unhealthy
            .with_label_values(&[label])
            .set(unhealthy as i64);
    }

    pub fn record_no_resource(&self, label: &str) {
        self.no_resources_total.with_label_values(&[label]).inc();
    }

    pub fn no_resource_count(&self, label: &str) -> u64 {
        self.no_resources_total.with_label_values(&[label]).get()
    }

    pub fn record_update(&self, label: &str, source: usize) {
        self.updates_total
            .with_label_values(&[label, &source.to_string()])
            .inc();
    }

    pub fn record_connection(&self, host: &str) {
        self.backend_conns_total.with_label_values(&[host]).inc();
    }

    pub fn record_connection_error(&self, host: &str, kind: &str) {
        self.backend_conn_errors_total
            .with_label_values(&[host, kind])
            .inc();
    }

    pub fn record_unhealthy(&self, host: &str) {
        self.backend_unhealthy_total.with_label_values(&[host]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exposes_pool_metrics() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();
        metrics.update_pool_counts("search", 3, 1);
        metrics.record_no_resource("search");
        metrics.record_no_resource("search");

        assert_eq!(metrics.no_resource_count("search"), 2);

        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains("discover_resources{label=\"search\"} 3"));
        assert!(text.contains("discover_resources_unhealthy{label=\"search\"} 1"));
    }
}
