// src/config/models.rs
use super::SourceConfig;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverConfig {
    pub label: String,
    #[serde(default)]
    pub discover_uri: Vec<String>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Upper bound on how long shutdown waits for in-flight requests
    /// before the pool is cleared.
    #[serde(default = "default_drain_delay", with = "humantime_serde")]
    pub drain_delay: Duration,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl DiscoverConfig {
    pub fn new(label: impl Into<String>, discover_uri: Vec<String>) -> Self {
        Self {
            label: label.into(),
            discover_uri,
            health_check: HealthCheckConfig::default(),
            drain_delay: DEFAULT_DRAIN_DELAY,
            metrics_port: default_metrics_port(),
        }
    }

    pub fn with_health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_drain_delay(mut self, drain_delay: Duration) -> Self {
        self.drain_delay = drain_delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            bail!("label must not be empty");
        }
        for uri in &self.discover_uri {
            SourceConfig::parse(uri)?;
        }
        Ok(())
    }
}

/// Active probe settings shared by every resource of one `Discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Probe URL. Empty disables probing and resources stay healthy.
    pub url: String,
    pub resp_code: u16,
    /// Substring the response body must contain, if non-empty.
    pub resp_content: String,
    pub interval: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            resp_code: 200,
            resp_content: String::new(),
            interval: String::new(),
        }
    }
}

impl HealthCheckConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn interval(&self) -> Duration {
        if self.interval.is_empty() {
            return DEFAULT_HEALTH_INTERVAL;
        }
        match humantime::parse_duration(&self.interval) {
            Ok(d) if !d.is_zero() => d,
            Ok(_) => DEFAULT_HEALTH_INTERVAL,
            Err(e) => {
                tracing::warn!(
                    interval = %self.interval,
                    error = %e,
                    "Invalid health check interval, using default"
                );
                DEFAULT_HEALTH_INTERVAL
            }
        }
    }
}

fn default_drain_delay() -> Duration {
    DEFAULT_DRAIN_DELAY
}

fn default_metrics_port() -> u16 {
    9090
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
