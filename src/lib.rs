// src/lib.rs
pub mod config;
pub mod discover;
pub mod discovery;
pub mod error;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod resource;

pub use discover::Discover;
pub use error::{DiscoverError, Result};
pub use resource::Resource;
