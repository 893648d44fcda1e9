// src/load_balancer/algorithm.rs
use crate::resource::Resource;
use std::sync::Arc;

/// Picks one resource from a published snapshot. Implementations must not
/// block: selection runs on the request path.
pub trait LoadBalancer: Send + Sync {
    fn select(&self, resources: &[Arc<Resource>]) -> Option<Arc<Resource>>;
}
