// src/discovery/channel.rs
use super::DiscoverySource;
use crate::config::DEFAULT_RESPONSE_TIMEOUT;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Source fed by the caller through [`ChannelSource::publish`], for
/// membership that is known up front or discovered by other means.
pub struct ChannelSource {
    protocol: String,
    weight: i64,
    timeout: Duration,
    sender: Mutex<Option<mpsc::Sender<Vec<String>>>>,
    updates: Mutex<Option<mpsc::Receiver<Vec<String>>>>,
}

impl ChannelSource {
    pub fn new(protocol: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            protocol: protocol.into(),
            weight: 0,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
            sender: Mutex::new(Some(tx)),
            updates: Mutex::new(Some(rx)),
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publishes a full address list. Returns false once the source has
    /// been stopped or nobody consumes it anymore.
    pub async fn publish(&self, addrs: Vec<String>) -> bool {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|sender| sender.as_ref().cloned());
        match sender {
            Some(sender) => sender.send(addrs).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl DiscoverySource for ChannelSource {
    fn updates(&self) -> Option<mpsc::Receiver<Vec<String>>> {
        self.updates.lock().ok()?.take()
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn weight(&self) -> i64 {
        self.weight
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn stop(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}
