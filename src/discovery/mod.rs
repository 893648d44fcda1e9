// src/discovery/mod.rs
//! Discovery sources: independent producers of full address lists.
//!
//! Every source hands out one update channel. Each message on it is that
//! source's complete current membership, never a delta. The stream ends when
//! the source has stopped.

mod channel;
mod dns;
mod orchestrator;
mod polling;

pub use channel::ChannelSource;
pub use dns::DnsLookup;
pub use orchestrator::PodLister;
pub use polling::PollingSource;

use crate::config::{SourceConfig, SourceKind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Takes the update stream. Only the first call returns it.
    fn updates(&self) -> Option<mpsc::Receiver<Vec<String>>>;

    /// Protocol tag given to resources created from this source.
    fn protocol(&self) -> &str;

    /// Advisory only; selection does not use it.
    fn weight(&self) -> i64;

    /// Response-header timeout for resources created from this source.
    fn timeout(&self) -> Duration;

    /// Stops producing. The update stream is closed once this returns.
    async fn stop(&self);
}

/// One discovery round: the full list of addresses currently present.
#[async_trait]
pub trait Lookup: Send + Sync + 'static {
    async fn lookup(&self) -> anyhow::Result<Vec<String>>;

    fn name(&self) -> String;
}

/// Builds the lookup for a parsed discovery URI without starting it.
pub fn lookup_for(config: &SourceConfig) -> Result<Arc<dyn Lookup>> {
    Ok(match config.kind {
        SourceKind::Dns => Arc::new(DnsLookup::new(&config.host, config.port)?),
        SourceKind::Orchestrator => Arc::new(PodLister::new(
            &config.namespace,
            config.port,
            config.kubeconfig.clone(),
        )),
    })
}

/// Parses every URI, then starts one polling source per URI. Any bad URI
/// fails the whole set before anything is started.
pub fn from_uris(uris: &[String]) -> Result<Vec<Arc<dyn DiscoverySource>>> {
    let lookups = uris
        .iter()
        .map(|uri| {
            let config = SourceConfig::parse(uri)?;
            let lookup = lookup_for(&config)?;
            Ok((config, lookup))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(lookups
        .into_iter()
        .map(|(config, lookup)| {
            Arc::new(PollingSource::spawn(config, lookup)) as Arc<dyn DiscoverySource>
        })
        .collect())
}
