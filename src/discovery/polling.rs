// src/discovery/polling.rs
use super::{DiscoverySource, Lookup};
use crate::config::SourceConfig;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

const STOP_GRACE: Duration = Duration::from_millis(100);

/// Runs a [`Lookup`] right away and then every `refresh`, publishing each
/// successful result. Failed rounds publish nothing.
pub struct PollingSource {
    config: SourceConfig,
    name: String,
    updates: Mutex<Option<mpsc::Receiver<Vec<String>>>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingSource {
    pub fn spawn(config: SourceConfig, lookup: Arc<dyn Lookup>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let name = lookup.name();

        info!(source = %name, refresh = ?config.refresh, "Starting discovery source");
        let task = tokio::spawn(poll(lookup, config.refresh, tx, stop_rx));

        Self {
            config,
            name,
            updates: Mutex::new(Some(rx)),
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

async fn poll(
    lookup: Arc<dyn Lookup>,
    refresh: Duration,
    tx: mpsc::Sender<Vec<String>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => break,
        }

        match lookup.lookup().await {
            Ok(addrs) => {
                debug!(source = %lookup.name(), count = addrs.len(), "Discovered addresses");
                tokio::select! {
                    sent = tx.send(addrs) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            Err(e) => {
                warn!(source = %lookup.name(), error = %e, "Discovery lookup failed");
            }
        }
    }

    debug!(source = %lookup.name(), "Discovery loop exited");
}

#[async_trait]
impl DiscoverySource for PollingSource {
    fn updates(&self) -> Option<mpsc::Receiver<Vec<String>>> {
        self.updates.lock().ok()?.take()
    }

    fn protocol(&self) -> &str {
        &self.config.protocol
    }

    fn weight(&self) -> i64 {
        self.config.weight
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn stop(&self) {
        self.stop_tx.send_replace(true);

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(mut task) = task {
            if timeout(self.config.refresh + STOP_GRACE, &mut task)
                .await
                .is_err()
            {
                warn!(source = %self.name, "Discovery source did not stop in time, aborting");
                task.abort();
            }
        }
        info!(source = %self.name, "Discovery source stopped");
    }
}
