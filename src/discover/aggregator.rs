// src/discover/aggregator.rs
use super::Shared;
use crate::config::HealthCheckConfig;
use crate::discovery::DiscoverySource;
use crate::metrics::MetricsCollector;
use crate::resource::{Resource, ResourcePool};
use futures::stream::{self, select_all, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// `Some(addrs)` for an update, `None` once the source's stream has ended.
type SourceEvent = (usize, Option<Vec<String>>);

/// Single writer of the resource pool. Fans in every source's updates,
/// merges them and publishes snapshots.
pub(super) struct Aggregator {
    pub label: String,
    pub sources: Vec<Arc<dyn DiscoverySource>>,
    pub health_check: HealthCheckConfig,
    pub drain_delay: Duration,
    pub shared: Arc<Shared>,
    pub metrics: Arc<MetricsCollector>,
    pub pool: ResourcePool,
}

impl Aggregator {
    /// Runs until every source stream has closed, then drains the pool.
    pub async fn run(mut self) {
        let mut streams = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            match source.updates() {
                Some(rx) => streams.push(source_events(index, rx)),
                None => warn!(label = %self.label, source = index, "Source updates already taken"),
            }
        }

        let mut remaining = streams.len();
        let mut events = select_all(streams);
        while remaining > 0 {
            match events.next().await {
                Some((index, Some(addrs))) => self.update(index, addrs),
                Some((index, None)) => {
                    remaining -= 1;
                    info!(label = %self.label, source = index, remaining, "Discovery source closed");
                }
                None => break,
            }
        }

        self.drain().await;
    }

    fn update(&mut self, index: usize, addrs: Vec<String>) {
        self.metrics.record_update(&self.label, index);
        let source = self.sources[index].clone();

        if let Some(snapshot) = self.pool.merge(
            source.as_ref(),
            &addrs,
            &self.health_check,
            &self.metrics,
            Instant::now(),
        ) {
            debug!(label = %self.label, size = snapshot.len(), "Publishing new snapshot");
            self.shared.publish(snapshot);
        }

        self.record_counts();
    }

    fn record_counts(&self) {
        let snapshot = self.shared.load();
        let unhealthy = snapshot.iter().filter(|r| !r.is_healthy()).count();
        self.metrics
            .update_pool_counts(&self.label, snapshot.len(), unhealthy);
    }

    /// Closes every resource, waits for in-flight requests up to the drain
    /// delay, then publishes an empty pool.
    async fn drain(mut self) {
        let closed = self.pool.close_all();
        info!(
            label = %self.label,
            resources = closed.len(),
            "All discovery sources closed, draining resources"
        );

        let deadline = Instant::now() + self.drain_delay;
        loop {
            let in_flight: usize = closed.iter().map(|r| r.in_flight()).sum();
            let now = Instant::now();
            if in_flight == 0 || now >= deadline {
                if in_flight > 0 {
                    warn!(label = %self.label, in_flight, "Drain delay elapsed with requests in flight");
                }
                break;
            }
            sleep(DRAIN_POLL.min(deadline - now)).await;
        }

        self.shared.publish(Vec::<Arc<Resource>>::new());
        self.metrics.update_pool_counts(&self.label, 0, 0);
        info!(label = %self.label, "Resource pool cleared");
    }
}

fn source_events(index: usize, rx: mpsc::Receiver<Vec<String>>) -> BoxStream<'static, SourceEvent> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|addrs| (addrs, rx)) })
        .map(Some)
        .chain(stream::once(async { None }))
        .map(move |event| (index, event))
        .boxed()
}
