// src/discover/mod.rs
//! The `Discover` handle: a live, health-checked pool of backends fed by
//! one or more discovery sources.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use backend_discover::{config::DiscoverConfig, metrics::MetricsCollector, Discover};
//!
//! let config = DiscoverConfig::new("search", vec!["dns+http://search.internal:8080".into()]);
//! let discover = Discover::new(config, MetricsCollector::detached()?)?;
//!
//! if let Some(resource) = discover.next_healthy() {
//!     println!("sending to {}", resource.base_url());
//! }
//! discover.shutdown();
//! # Ok(())
//! # }
//! ```

mod aggregator;

use crate::config::{DiscoverConfig, HealthCheckConfig};
use crate::discovery::{self, DiscoverySource};
use crate::error::Result;
use crate::load_balancer::{LoadBalancer, RoundRobinBalancer};
use crate::metrics::MetricsCollector;
use crate::resource::{tls_connector, Resource, ResourcePool};
use aggregator::Aggregator;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Published state: written by the aggregator only, read lock-free by
/// everyone else.
pub(crate) struct Shared {
    snapshot: ArcSwap<Vec<Arc<Resource>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn load(&self) -> Arc<Vec<Arc<Resource>>> {
        self.snapshot.load_full()
    }

    fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    fn publish(&self, resources: Vec<Arc<Resource>>) {
        self.snapshot.store(Arc::new(resources));
    }
}

pub struct Discover {
    label: String,
    sources: Vec<Arc<dyn DiscoverySource>>,
    shared: Arc<Shared>,
    balancer: RoundRobinBalancer,
    metrics: Arc<MetricsCollector>,
    exiting: AtomicBool,
}

impl Discover {
    /// Starts every source named in `config.discover_uri` and the
    /// aggregator. Any invalid URI fails construction before anything starts.
    pub fn new(config: DiscoverConfig, metrics: Arc<MetricsCollector>) -> Result<Self> {
        let sources = discovery::from_uris(&config.discover_uri)?;
        Self::with_sources(
            config.label,
            sources,
            config.health_check,
            config.drain_delay,
            metrics,
        )
    }

    /// Starts the aggregator over already-running sources. Fails only when
    /// the TLS connector shared by all resources cannot be built.
    pub fn with_sources(
        label: impl Into<String>,
        sources: Vec<Arc<dyn DiscoverySource>>,
        health_check: HealthCheckConfig,
        drain_delay: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let label = label.into();
        let shared = Arc::new(Shared::new());
        let pool = ResourcePool::new(tls_connector()?);

        info!(label = %label, sources = sources.len(), "Starting discovery");
        let aggregator = Aggregator {
            label: label.clone(),
            sources: sources.clone(),
            health_check,
            drain_delay,
            shared: shared.clone(),
            metrics: metrics.clone(),
            pool,
        };
        tokio::spawn(aggregator.run());

        Ok(Self {
            label,
            sources,
            shared,
            balancer: RoundRobinBalancer::new(),
            metrics,
            exiting: AtomicBool::new(false),
        })
    }

    /// Next healthy resource in round-robin order, or `None` when the pool
    /// is empty or every resource is unhealthy.
    pub fn next_healthy(&self) -> Option<Arc<Resource>> {
        let snapshot = self.shared.snapshot.load();
        let selected = self.balancer.select(&snapshot);
        if selected.is_none() {
            debug!(label = %self.label, size = snapshot.len(), "No resource available");
            self.metrics.record_no_resource(&self.label);
        }
        selected
    }

    /// Length of the current snapshot.
    pub fn size(&self) -> usize {
        self.shared.len()
    }

    /// The current published pool. Never changes once returned.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Resource>>> {
        self.shared.load()
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Asks every source to stop and returns immediately. Once all source
    /// streams have closed the aggregator closes its resources, waits for
    /// in-flight requests up to the drain delay and clears the pool.
    pub fn shutdown(&self) {
        if self.exiting.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(label = %self.label, "Shutting down discovery");

        let sources = self.sources.clone();
        tokio::spawn(async move {
            futures::future::join_all(sources.iter().map(|source| source.stop())).await;
        });
    }
}
