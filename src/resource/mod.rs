//
// src/resource/mod.rs
//
mod dialer;
mod pool;
#[allow(clippy::module_inception)]
mod resource;

pub use dialer::{join_host_port, split_host, tls_connector, PinnedConnector};
pub use pool::ResourcePool;
pub use resource::{Resource, STALENESS_WINDOW};

#[cfg(test)]
pub(crate) use resource::{test_resource, test_tls};
