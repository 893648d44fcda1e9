// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::resource::Resource;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round robin over the snapshot, skipping unhealthy resources. Each
/// attempt advances the shared counter, which wraps on overflow.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, resources: &[Arc<Resource>]) -> Option<Arc<Resource>> {
        let size = resources.len();
        for _ in 0..size {
            let resource = &resources[self.next() % size];
            if resource.is_healthy() {
                return Some(resource.clone());
            }
        }
        None
    }
}
