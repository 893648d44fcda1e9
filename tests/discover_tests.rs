// tests/discover_tests.rs
use backend_discover::config::HealthCheckConfig;
use backend_discover::discovery::{ChannelSource, DiscoverySource};
use backend_discover::metrics::MetricsCollector;
use backend_discover::Discover;
use hyper::{Body, Request};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};

fn addrs(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn start(
    sources: &[Arc<ChannelSource>],
    health_check: HealthCheckConfig,
    drain_delay: Duration,
) -> (Discover, Arc<MetricsCollector>) {
    let metrics = MetricsCollector::detached().unwrap();
    let sources = sources
        .iter()
        .map(|s| s.clone() as Arc<dyn DiscoverySource>)
        .collect();
    let discover = Discover::with_sources(
        "integration",
        sources,
        health_check,
        drain_delay,
        metrics.clone(),
    )
    .unwrap();
    (discover, metrics)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_round_robin_distribution() {
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, _) = start(&[source.clone()], HealthCheckConfig::default(), Duration::ZERO);

    let hosts = addrs(&["1.1.1.1:80", "1.1.1.2:80", "1.1.1.3:80"]);
    source.publish(hosts.clone()).await;
    assert!(eventually(|| discover.size() == 3).await);

    for i in 1..=20 {
        let resource = discover.next_healthy().unwrap();
        assert_eq!(resource.host, hosts[i % 3]);
    }
}

#[tokio::test]
async fn test_sources_share_one_resource_per_address() {
    let dns = Arc::new(ChannelSource::new("http"));
    let pods = Arc::new(ChannelSource::new("https"));
    let (discover, _) = start(
        &[dns.clone(), pods.clone()],
        HealthCheckConfig::default(),
        Duration::ZERO,
    );

    dns.publish(addrs(&["10.0.0.1:80", "10.0.0.2:80"])).await;
    assert!(eventually(|| discover.size() == 2).await);
    pods.publish(addrs(&["10.0.0.2:80", "10.0.0.3:80"])).await;
    assert!(eventually(|| discover.size() == 3).await);

    let snapshot = discover.snapshot();
    let hosts: Vec<&str> = snapshot.iter().map(|r| r.host.as_str()).collect();
    assert_eq!(hosts, vec!["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
    assert_eq!(snapshot[1].protocol, "http");
    assert_eq!(snapshot[2].protocol, "https");
}

#[tokio::test]
async fn test_health_check_excludes_unhealthy_backends() {
    let mut server = mockito::Server::new_async().await;
    let port = server.socket_address().port();
    server
        .mock("GET", "/health")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let health_check = HealthCheckConfig {
        url: format!("http://backend.local:{}/health", port),
        resp_code: 200,
        resp_content: "ok".to_string(),
        interval: "50ms".to_string(),
    };
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, metrics) = start(&[source.clone()], health_check, Duration::ZERO);

    // Only 127.0.0.1 has the mock server listening on the probe port.
    let live = format!("127.0.0.1:{}", port);
    let dead = format!("127.0.0.2:{}", port);
    source.publish(vec![live.clone(), dead.clone()]).await;
    assert!(eventually(|| discover.size() == 2).await);

    let snapshot = discover.snapshot();
    assert!(eventually(|| !snapshot[1].is_healthy()).await);
    assert!(snapshot[0].is_healthy());
    let unhealthy = metrics.backend_unhealthy_total.with_label_values(&[dead.as_str()]);
    assert!(eventually(|| unhealthy.get() == 1).await);

    for _ in 0..10 {
        assert_eq!(discover.next_healthy().unwrap().host, live);
    }
    discover.shutdown();
}

#[tokio::test]
async fn test_exhaustion_counts_each_call() {
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, metrics) = start(&[source], HealthCheckConfig::default(), Duration::ZERO);

    for _ in 0..5 {
        assert!(discover.next_healthy().is_none());
    }
    assert_eq!(metrics.no_resource_count("integration"), 5);
}

#[tokio::test]
async fn test_all_unhealthy_counts_each_call() {
    // Nothing listens on the probe port, so every probe fails.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let probe_port = listener.local_addr().unwrap().port();
    drop(listener);

    let health_check = HealthCheckConfig {
        url: format!("http://backend.local:{}/health", probe_port),
        interval: "50ms".to_string(),
        ..HealthCheckConfig::default()
    };
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, metrics) = start(&[source.clone()], health_check, Duration::ZERO);

    source
        .publish(addrs(&["127.0.0.1:8001", "127.0.0.1:8002", "127.0.0.1:8003"]))
        .await;
    assert!(eventually(|| discover.size() == 3).await);
    let snapshot = discover.snapshot();
    assert!(eventually(|| snapshot.iter().all(|r| !r.is_healthy())).await);
    assert_eq!(metrics.no_resource_count("integration"), 0);

    for _ in 0..7 {
        assert!(discover.next_healthy().is_none());
    }
    assert_eq!(metrics.no_resource_count("integration"), 7);
    discover.shutdown();
}

#[tokio::test]
async fn test_snapshots_are_never_partial() {
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, _) = start(&[source.clone()], HealthCheckConfig::default(), Duration::ZERO);
    let discover = Arc::new(discover);
    let all: Vec<String> = (0..50).map(|i| format!("10.9.0.{}:80", i)).collect();

    let reader = {
        let discover = discover.clone();
        let all = all.clone();
        tokio::spawn(async move {
            while discover.size() < all.len() {
                let snapshot = discover.snapshot();
                for (resource, expected) in snapshot.iter().zip(&all) {
                    assert_eq!(&resource.host, expected);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for n in 1..=all.len() {
        source.publish(all[..n].to_vec()).await;
    }
    reader.await.unwrap();
    assert_eq!(discover.snapshot().len(), all.len());
}

/// Accepts one connection and answers after `delay`.
async fn slow_backend(delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        sleep(delay).await;
        let _ = stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await;
    });
    addr
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_requests() {
    let backend = slow_backend(Duration::from_millis(300)).await;
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, _) = start(
        &[source.clone()],
        HealthCheckConfig::default(),
        Duration::from_secs(3),
    );

    source.publish(vec![backend.clone()]).await;
    assert!(eventually(|| discover.size() == 1).await);

    let resource = discover.next_healthy().unwrap();
    let request = {
        let resource = resource.clone();
        tokio::spawn(async move {
            let req = Request::get("http://backend/slow").body(Body::empty()).unwrap();
            resource.request(req).await
        })
    };
    assert!(eventually(|| resource.in_flight() == 1).await);

    discover.shutdown();
    assert!(eventually(|| resource.is_closing()).await);
    assert_eq!(discover.size(), 1);

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert!(eventually(|| discover.size() == 0).await);
    assert!(discover.snapshot().is_empty());
}

#[tokio::test]
async fn test_shutdown_clears_pool_after_drain_delay() {
    let source = Arc::new(ChannelSource::new("http"));
    let (discover, metrics) = start(
        &[source.clone()],
        HealthCheckConfig::default(),
        Duration::from_millis(200),
    );

    source.publish(addrs(&["10.0.0.1:80", "10.0.0.2:80"])).await;
    assert!(eventually(|| discover.size() == 2).await);
    let snapshot = discover.snapshot();

    discover.shutdown();
    assert!(eventually(|| discover.size() == 0).await);
    assert!(snapshot.iter().all(|r| r.is_closing()));
    assert!(discover.next_healthy().is_none());
    assert_eq!(metrics.resources.with_label_values(&["integration"]).get(), 0);
}
