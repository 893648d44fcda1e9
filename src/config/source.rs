// src/config/source.rs
use crate::error::{DiscoverError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::{Host, Url};

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Dns,
    Orchestrator,
}

/// Connection parameters of one discovery source, parsed from
/// `<kind>[+<protocol>]://<host>:<port>?<query>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub weight: i64,
    pub refresh: Duration,
    pub timeout: Duration,
    pub namespace: String,
    pub kubeconfig: PathBuf,
}

impl SourceConfig {
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|source| DiscoverError::InvalidUri {
            uri: uri.to_string(),
            source,
        })?;

        let scheme = url.scheme().to_ascii_lowercase();
        let (kind, protocol) = match scheme.split_once('+') {
            Some((kind, protocol)) => (kind, protocol.to_string()),
            None => (scheme.as_str(), String::new()),
        };
        let kind = match kind {
            "dns" => SourceKind::Dns,
            "orchestrator" | "k8s" => SourceKind::Orchestrator,
            other => return Err(DiscoverError::UnknownScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ if kind == SourceKind::Orchestrator => String::new(),
            _ => return Err(DiscoverError::MissingHost(uri.to_string())),
        };
        let port = url
            .port()
            .ok_or_else(|| DiscoverError::MissingPort(uri.to_string()))?;

        let mut config = Self {
            kind,
            host,
            port,
            protocol,
            weight: 0,
            refresh: DEFAULT_REFRESH,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubeconfig: default_kubeconfig(),
        };

        for (key, value) in url.query_pairs() {
            match (key.to_ascii_lowercase().as_str(), kind) {
                ("refresh", _) => config.refresh = duration_or(&key, &value, DEFAULT_REFRESH),
                ("timeout", _) => {
                    config.timeout = duration_or(&key, &value, DEFAULT_RESPONSE_TIMEOUT)
                }
                ("weight", _) => {
                    config.weight = value.parse().unwrap_or_else(|e| {
                        warn!(uri, %value, error = %e, "Invalid weight, using 0");
                        0
                    })
                }
                ("namespace", SourceKind::Orchestrator) if !value.is_empty() => {
                    config.namespace = value.into_owned()
                }
                ("path", SourceKind::Orchestrator) if !value.is_empty() => {
                    config.kubeconfig = PathBuf::from(value.as_ref())
                }
                _ => warn!(uri, %key, %value, "Unknown discovery query parameter"),
            }
        }

        Ok(config)
    }
}

fn duration_or(key: &str, value: &str, default: Duration) -> Duration {
    match humantime::parse_duration(value) {
        Ok(d) if !d.is_zero() => d,
        Ok(_) => default,
        Err(e) => {
            warn!(%key, %value, error = %e, "Invalid duration, using default");
            default
        }
    }
}

fn default_kubeconfig() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}
