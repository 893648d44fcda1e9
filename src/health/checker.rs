// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::resource::{join_host_port, split_host, PinnedConnector, Resource};
use hyper::{Body, Client, Method, Request, Uri};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tokio_native_tls::TlsConnector;
use tracing::{debug, error, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Periodic prober for one resource. The probe URL's host is only used for
/// the request line; the connection goes to the resource's host on the URL's
/// port.
pub struct HealthChecker {
    config: HealthCheckConfig,
    host: String,
    target: Option<Uri>,
    client: Client<PinnedConnector>,
    metrics: Arc<MetricsCollector>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub host: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        host: &str,
        tls: TlsConnector,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let target = match config.url.parse::<Uri>() {
            Ok(uri) => Some(uri),
            Err(e) => {
                error!(url = %config.url, error = %e, "Invalid health check url");
                None
            }
        };

        let port = target
            .as_ref()
            .and_then(|uri| {
                uri.port_u16().or(match uri.scheme_str() {
                    Some("https") => Some(443),
                    _ => None,
                })
            })
            .unwrap_or(80);
        let probe_addr = join_host_port(split_host(host), port);
        let client = Client::builder().build(PinnedConnector::new(probe_addr, tls, metrics.clone()));

        Self {
            config,
            host: host.to_string(),
            target,
            client,
            metrics,
        }
    }

    /// Probes every interval until the resource is closed.
    pub async fn run(self, resource: Arc<Resource>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            host = %self.host,
            "Starting health checks with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {}
            }
            if resource.is_closing() {
                debug!(host = %self.host, "Health checks stopped");
                break;
            }

            let result = self.check().await;
            self.apply(&resource, &result);
        }
    }

    pub async fn check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let error = match timeout(PROBE_TIMEOUT, self.probe()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some("Request timeout".to_string()),
        };

        HealthCheckResult {
            host: self.host.clone(),
            healthy: error.is_none(),
            response_time_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        let uri = self
            .target
            .clone()
            .ok_or_else(|| format!("invalid url {}", self.config.url))?;
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| e.to_string())?;

        let response = self.client.request(req).await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        if status != self.config.resp_code {
            return Err(format!("HTTP {}", status));
        }

        if !self.config.resp_content.is_empty() {
            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| e.to_string())?;
            if !contains(&body, self.config.resp_content.as_bytes()) {
                return Err("expected content not found".to_string());
            }
        }

        Ok(())
    }

    fn apply(&self, resource: &Resource, result: &HealthCheckResult) {
        debug!(
            host = %result.host,
            healthy = result.healthy,
            response_time_ms = result.response_time_ms,
            "Health check complete"
        );

        if !resource.mark(result.healthy) {
            return;
        }
        if result.healthy {
            info!(host = %result.host, "Resource is healthy again");
        } else {
            self.metrics.record_unhealthy(&result.host);
            warn!(
                host = %result.host,
                error = ?result.error,
                "Resource is now unhealthy"
            );
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ChannelSource;
    use crate::resource::test_tls;
    use mockito::Server;
    use tokio::time::{sleep, Instant};

    fn health_config(port: u16, resp_content: &str) -> HealthCheckConfig {
        HealthCheckConfig {
            url: format!("http://localhost:{}/health", port),
            resp_code: 200,
            resp_content: resp_content.to_string(),
            interval: "50ms".to_string(),
        }
    }

    async fn wait_for(resource: &Resource, healthy: bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if resource.is_healthy() == healthy {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn test_contains() {
        assert!(contains(b"status: ok", b"ok"));
        assert!(!contains(b"status: down", b"ok"));
        assert!(contains(b"", b""));
    }

    #[tokio::test]
    async fn test_check_status_and_content() {
        let mut server = Server::new_async().await;
        let port = server.socket_address().port();
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("status: ok")
            .create_async()
            .await;

        let metrics = MetricsCollector::detached().unwrap();
        let host = format!("127.0.0.1:{}", port + 1);

        let checker = HealthChecker::new(health_config(port, "ok"), &host, test_tls(), metrics.clone());
        assert!(checker.check().await.healthy);

        let checker =
            HealthChecker::new(health_config(port, "ready"), &host, test_tls(), metrics.clone());
        let result = checker.check().await;
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("expected content not found"));

        let mut config = health_config(port, "");
        config.resp_code = 204;
        let checker = HealthChecker::new(config, &host, test_tls(), metrics);
        assert_eq!(checker.check().await.error.as_deref(), Some("HTTP 200"));
    }

    #[tokio::test]
    async fn test_probe_failure_on_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let metrics = MetricsCollector::detached().unwrap();
        let checker =
            HealthChecker::new(health_config(port, ""), "127.0.0.1:80", test_tls(), metrics);
        assert!(!checker.check().await.healthy);
    }

    #[tokio::test]
    async fn test_transitions_follow_probe_outcome() {
        let mut server = Server::new_async().await;
        let port = server.socket_address().port();
        let ok = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let metrics = MetricsCollector::detached().unwrap();
        let source = ChannelSource::new("http");
        let host = format!("127.0.0.1:{}", port);
        let resource = Resource::new(
            &host,
            &source,
            &health_config(port, ""),
            &test_tls(),
            &metrics,
            Instant::now(),
        );
        assert!(resource.is_healthy());

        ok.remove_async().await;
        let failing = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        assert!(wait_for(&resource, false).await);
        // The counter is bumped right after the flag flips.
        sleep(Duration::from_millis(20)).await;
        assert_eq!(
            metrics
                .backend_unhealthy_total
                .with_label_values(&[host.as_str()])
                .get(),
            1
        );

        failing.remove_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;
        assert!(wait_for(&resource, true).await);

        resource.close();
    }
}
