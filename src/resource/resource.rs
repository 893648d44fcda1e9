// src/resource/resource.rs
use super::dialer::PinnedConnector;
use crate::config::HealthCheckConfig;
use crate::discovery::DiscoverySource;
use crate::error::{DiscoverError, Result};
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use arc_swap::ArcSwap;
use hyper::{Body, Client, Request, Response};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{timeout, Duration, Instant};
use tokio_native_tls::TlsConnector;
use tracing::info;

/// How long a resource may go without being re-announced by any source.
pub const STALENESS_WINDOW: Duration = Duration::from_secs(60);

const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE_CONNS: usize = 100;

/// One discovered backend address with its own connection pool and
/// liveness flag.
pub struct Resource {
    pub host: String,
    pub protocol: String,
    pub weight: i64,
    response_timeout: Duration,

    connector: PinnedConnector,
    client: ArcSwap<Client<PinnedConnector>>,

    // Runtime state
    healthy: AtomicBool,
    closing: AtomicBool,
    created_at: Instant,
    refreshed_nanos: AtomicU64,
    in_flight: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
}

impl Resource {
    /// Builds a resource for `host` and, when a probe URL is configured,
    /// starts its health-check loop. `tls` is shared with every other
    /// resource of the pool.
    pub fn new(
        host: &str,
        source: &dyn DiscoverySource,
        health_check: &HealthCheckConfig,
        tls: &TlsConnector,
        metrics: &Arc<MetricsCollector>,
        now: Instant,
    ) -> Arc<Self> {
        let connector = PinnedConnector::new(host, tls.clone(), metrics.clone());
        let checker = health_check
            .is_enabled()
            .then(|| HealthChecker::new(health_check.clone(), host, tls.clone(), metrics.clone()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let resource = Arc::new(Self {
            host: host.to_string(),
            protocol: source.protocol().to_string(),
            weight: source.weight(),
            response_timeout: source.timeout(),
            client: ArcSwap::from_pointee(build_client(connector.clone())),
            connector,
            healthy: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            created_at: now,
            refreshed_nanos: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            shutdown_tx,
        });

        if let Some(checker) = checker {
            tokio::spawn(checker.run(resource.clone(), shutdown_rx));
        }

        resource
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Moves the liveness flag to `healthy`. Returns false when it was
    /// already there.
    pub(crate) fn mark(&self, healthy: bool) -> bool {
        self.healthy
            .compare_exchange(!healthy, healthy, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn refresh(&self, now: Instant) {
        let nanos = now.saturating_duration_since(self.created_at).as_nanos();
        self.refreshed_nanos
            .store(u64::try_from(nanos).unwrap_or(u64::MAX), Ordering::Release);
    }

    pub fn last_refreshed(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.refreshed_nanos.load(Ordering::Acquire))
    }

    /// True when the last refresh is older than `now` minus the staleness window.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.last_refreshed() + STALENESS_WINDOW < now
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Base URL for requests against this resource, e.g. `http://10.0.0.1:80`.
    pub fn base_url(&self) -> String {
        let scheme = if self.protocol.is_empty() {
            "http"
        } else {
            self.protocol.as_str()
        };
        format!("{}://{}", scheme, self.host)
    }

    /// Sends `req` over this resource's pinned transport. The URI host is
    /// ignored for dialing.
    pub async fn request(&self, req: Request<Body>) -> Result<Response<Body>> {
        let client = self.client.load_full();
        let _guard = InFlight::enter(&self.in_flight);

        match timeout(self.response_timeout, client.request(req)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(DiscoverError::Timeout),
        }
    }

    /// Marks the resource closing, stops its health checks and drops idle
    /// connections. In-flight requests keep their connections. Idempotent.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.send_replace(true);
        self.client
            .store(Arc::new(build_client(self.connector.clone())));
        info!(host = %self.host, "Resource closed");
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("healthy", &self.is_healthy())
            .field("closing", &self.is_closing())
            .finish()
    }
}

fn build_client(connector: PinnedConnector) -> Client<PinnedConnector> {
    Client::builder()
        .pool_idle_timeout(IDLE_CONN_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_CONNS)
        .build(connector)
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
pub(crate) fn test_tls() -> TlsConnector {
    static TLS: std::sync::OnceLock<TlsConnector> = std::sync::OnceLock::new();
    TLS.get_or_init(|| super::tls_connector().unwrap()).clone()
}

#[cfg(test)]
pub(crate) fn test_resource(host: &str) -> Arc<Resource> {
    let source = crate::discovery::ChannelSource::new("http");
    let metrics = MetricsCollector::detached().unwrap();
    Resource::new(
        host,
        &source,
        &HealthCheckConfig::default(),
        &test_tls(),
        &metrics,
        Instant::now(),
    )
}
