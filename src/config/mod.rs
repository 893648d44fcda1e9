// src/config/mod.rs
mod models;
mod source;

pub use models::*;
pub use source::{
    SourceConfig, SourceKind, DEFAULT_NAMESPACE, DEFAULT_REFRESH, DEFAULT_RESPONSE_TIMEOUT,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON), with `DISCOVER__*`
/// environment variables layered on top.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DiscoverConfig> {
    let path = path.as_ref();
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("DISCOVER").separator("__"))
        .build()
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: DiscoverConfig = settings
        .try_deserialize()
        .context("Failed to parse config")?;

    config.validate()?;
    Ok(config)
}
