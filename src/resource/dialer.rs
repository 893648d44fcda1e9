// src/resource/dialer.rs
use crate::error::{DiscoverError, Result};
use crate::metrics::MetricsCollector;
use hyper::http::uri::Scheme;
use hyper::Uri;
use hyper_tls::MaybeHttpsStream;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_native_tls::{TlsConnector, TlsStream};
use tower::Service;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector whose every dial goes to one fixed address, whatever host the
/// request URI names. Re-resolution happens upstream, in discovery.
#[derive(Clone)]
pub struct PinnedConnector {
    addr: Arc<str>,
    tls: TlsConnector,
    metrics: Arc<MetricsCollector>,
}

/// TLS settings for backend connections. Building one loads the system
/// trust store, so it is done once per pool and cloned into every
/// connector.
pub fn tls_connector() -> Result<TlsConnector> {
    // Backends come from a trusted discovery channel; certificates are not verified.
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    Ok(tls.into())
}

impl PinnedConnector {
    pub fn new(
        addr: impl Into<Arc<str>>,
        tls: TlsConnector,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            addr: addr.into(),
            tls,
            metrics,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn dial(&self) -> Result<TcpStream> {
        let result = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&*self.addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        };

        match result {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                self.metrics.record_connection(&self.addr);
                Ok(stream)
            }
            Err(source) => {
                self.metrics
                    .record_connection_error(&self.addr, &format!("{:?}", source.kind()));
                Err(DiscoverError::Connect {
                    addr: self.addr.to_string(),
                    source,
                })
            }
        }
    }

    pub async fn dial_tls(&self, domain: &str) -> Result<TlsStream<TcpStream>> {
        let stream = self.dial().await?;
        match timeout(TLS_HANDSHAKE_TIMEOUT, self.tls.connect(domain, stream)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                self.metrics.record_connection_error(&self.addr, "Tls");
                Err(DiscoverError::Tls(e))
            }
            Err(_) => {
                self.metrics.record_connection_error(&self.addr, "TlsTimeout");
                Err(DiscoverError::Timeout)
            }
        }
    }
}

impl Service<Uri> for PinnedConnector {
    type Response = MaybeHttpsStream<TcpStream>;
    type Error = DiscoverError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move {
            if uri.scheme() == Some(&Scheme::HTTPS) {
                let domain = uri
                    .host()
                    .map(str::to_string)
                    .unwrap_or_else(|| split_host(connector.addr()).to_string());
                let stream = connector.dial_tls(&domain).await?;
                Ok(MaybeHttpsStream::Https(stream))
            } else {
                let stream = connector.dial().await?;
                Ok(MaybeHttpsStream::Http(stream))
            }
        })
    }
}

/// Host part of a `host:port` address, without IPv6 brackets.
pub fn split_host(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
