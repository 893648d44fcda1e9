// src/resource/pool.rs
use super::resource::Resource;
use crate::config::HealthCheckConfig;
use crate::discovery::DiscoverySource;
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_native_tls::TlsConnector;
use tracing::info;

/// All resources known to one aggregator, across every source. Owned and
/// mutated by the aggregator task only; readers get copies.
pub struct ResourcePool {
    resources: Vec<Arc<Resource>>,
    tls: TlsConnector,
}

impl ResourcePool {
    /// `tls` is cloned into every resource this pool creates.
    pub fn new(tls: TlsConnector) -> Self {
        Self {
            resources: Vec::new(),
            tls,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, host: &str) -> Option<&Arc<Resource>> {
        self.resources.iter().find(|r| r.host == host)
    }

    /// Folds one source's full address list into the pool.
    ///
    /// Known addresses are refreshed, new ones get a resource built from
    /// `source`'s settings, and any resource in the whole pool that went
    /// unrefreshed past the staleness window is closed. Returns the compacted
    /// pool to publish when anything was created or evicted.
    pub fn merge(
        &mut self,
        source: &dyn DiscoverySource,
        addrs: &[String],
        health_check: &HealthCheckConfig,
        metrics: &Arc<MetricsCollector>,
        now: Instant,
    ) -> Option<Vec<Arc<Resource>>> {
        let mut changed = false;

        for addr in addrs {
            if let Some(resource) = self.get(addr) {
                resource.refresh(now);
                continue;
            }
            let resource = Resource::new(addr, source, health_check, &self.tls, metrics, now);
            info!(host = %addr, protocol = %resource.protocol, "Added new resource");
            self.resources.push(resource);
            changed = true;
        }

        for resource in &self.resources {
            if !resource.is_closing() && resource.is_stale(now) {
                info!(host = %resource.host, "Evicting stale resource");
                resource.close();
                changed = true;
            }
        }

        if !changed {
            return None;
        }
        self.compact();
        Some(self.resources.clone())
    }

    fn compact(&mut self) {
        self.resources.retain(|r| !r.is_closing());
    }

    /// Closes every resource and empties the pool, handing the closed
    /// resources back so the caller can wait for their in-flight work.
    pub fn close_all(&mut self) -> Vec<Arc<Resource>> {
        for resource in &self.resources {
            resource.close();
        }
        std::mem::take(&mut self.resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ChannelSource;
    use crate::resource::{test_tls, tls_connector};
    use tokio::time::Duration;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn hosts(resources: &[Arc<Resource>]) -> Vec<&str> {
        resources.iter().map(|r| r.host.as_str()).collect()
    }

    #[test]
    fn test_merge_creates_and_refreshes() {
        let source = ChannelSource::new("http");
        let metrics = MetricsCollector::detached().unwrap();
        let hc = HealthCheckConfig::default();
        let mut pool = ResourcePool::new(test_tls());
        let t = Instant::now();

        let published = pool
            .merge(&source, &addrs(&["1.1.1.1:80", "1.1.1.2:80"]), &hc, &metrics, t)
            .unwrap();
        assert_eq!(hosts(&published), vec!["1.1.1.1:80", "1.1.1.2:80"]);

        let first = pool.get("1.1.1.1:80").unwrap().clone();
        let later = t + Duration::from_secs(30);
        let published = pool
            .merge(&source, &addrs(&["1.1.1.1:80", "1.1.1.2:80"]), &hc, &metrics, later);
        assert!(published.is_none());
        assert!(Arc::ptr_eq(&first, pool.get("1.1.1.1:80").unwrap()));
        assert_eq!(first.last_refreshed(), later);
    }

    #[test]
    fn test_same_address_from_two_sources_is_unique() {
        let first = ChannelSource::new("http");
        let second = ChannelSource::new("https");
        let metrics = MetricsCollector::detached().unwrap();
        let hc = HealthCheckConfig::default();
        let mut pool = ResourcePool::new(test_tls());
        let t = Instant::now();

        pool.merge(&first, &addrs(&["1.1.1.1:80", "1.1.1.1:80"]), &hc, &metrics, t)
            .unwrap();
        let published = pool
            .merge(&second, &addrs(&["1.1.1.1:80", "1.1.1.3:80"]), &hc, &metrics, t)
            .unwrap();

        assert_eq!(hosts(&published), vec!["1.1.1.1:80", "1.1.1.3:80"]);
        assert_eq!(pool.get("1.1.1.1:80").unwrap().protocol, "http");
        assert_eq!(pool.get("1.1.1.3:80").unwrap().protocol, "https");
    }

    #[test]
    fn test_stale_resources_are_evicted_across_sources() {
        let dns = ChannelSource::new("http");
        let other = ChannelSource::new("http");
        let metrics = MetricsCollector::detached().unwrap();
        let hc = HealthCheckConfig::default();
        let mut pool = ResourcePool::new(test_tls());
        let t = Instant::now();

        pool.merge(&dns, &addrs(&["10.0.0.1:80"]), &hc, &metrics, t)
            .unwrap();
        let evicted = pool.get("10.0.0.1:80").unwrap().clone();

        // Another source reports at T+61s; the first address was never re-mentioned.
        let published = pool
            .merge(
                &other,
                &addrs(&["10.0.0.2:80"]),
                &hc,
                &metrics,
                t + Duration::from_secs(61),
            )
            .unwrap();

        assert_eq!(hosts(&published), vec!["10.0.0.2:80"]);
        assert!(evicted.is_closing());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_empty_list_only_evicts() {
        let source = ChannelSource::new("http");
        let metrics = MetricsCollector::detached().unwrap();
        let hc = HealthCheckConfig::default();
        let mut pool = ResourcePool::new(test_tls());
        let t = Instant::now();

        pool.merge(&source, &addrs(&["10.0.0.1:80"]), &hc, &metrics, t)
            .unwrap();
        assert!(pool
            .merge(&source, &[], &hc, &metrics, t + Duration::from_secs(10))
            .is_none());

        let published = pool
            .merge(&source, &[], &hc, &metrics, t + Duration::from_secs(90))
            .unwrap();
        assert!(published.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_close_all() {
        let source = ChannelSource::new("http");
        let metrics = MetricsCollector::detached().unwrap();
        let mut pool = ResourcePool::new(test_tls());
        pool.merge(
            &source,
            &addrs(&["10.0.0.1:80", "10.0.0.2:80"]),
            &HealthCheckConfig::default(),
            &metrics,
            Instant::now(),
        )
        .unwrap();

        let closed = pool.close_all();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|r| r.is_closing()));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_large_update_merges_quickly() {
        let source = ChannelSource::new("https");
        let metrics = MetricsCollector::detached().unwrap();
        let hc = HealthCheckConfig {
            url: "http://backend.local:1/health".to_string(),
            interval: "1h".to_string(),
            ..HealthCheckConfig::default()
        };
        let mut pool = ResourcePool::new(tls_connector().unwrap());
        let batch: Vec<String> = (0..50).map(|i| format!("10.3.0.{}:443", i)).collect();

        let started = std::time::Instant::now();
        let published = pool
            .merge(&source, &batch, &hc, &metrics, Instant::now())
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(published.len(), 50);
        assert!(
            elapsed < std::time::Duration::from_millis(500),
            "merging 50 new addresses took {:?}",
            elapsed
        );
        pool.close_all();
    }
}
