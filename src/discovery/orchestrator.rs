// src/discovery/orchestrator.rs
//! Pod listing against the Kubernetes API.
//!
//! Credentials come from the pod's service account when running in-cluster,
//! otherwise from a kubeconfig file (bearer-token users only).

use super::Lookup;
use crate::resource::join_host_port;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

const API_TIMEOUT: Duration = Duration::from_secs(60);
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

pub struct PodLister {
    namespace: String,
    port: u16,
    kubeconfig: PathBuf,
    api: OnceCell<ApiClient>,
}

impl PodLister {
    pub fn new(namespace: &str, port: u16, kubeconfig: PathBuf) -> Self {
        Self {
            namespace: namespace.to_string(),
            port,
            kubeconfig,
            api: OnceCell::new(),
        }
    }

    /// Lister talking to an explicit API server.
    pub fn with_server(
        namespace: &str,
        port: u16,
        server: &str,
        token: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(Self {
            namespace: namespace.to_string(),
            port,
            kubeconfig: PathBuf::new(),
            api: OnceCell::new_with(Some(ApiClient {
                server: server.trim_end_matches('/').to_string(),
                token,
                client,
            })),
        })
    }

    // Retried on every round until credentials load.
    async fn api(&self) -> anyhow::Result<&ApiClient> {
        self.api
            .get_or_try_init(|| ApiClient::load(&self.kubeconfig))
            .await
    }
}

#[async_trait]
impl Lookup for PodLister {
    async fn lookup(&self) -> anyhow::Result<Vec<String>> {
        let api = self.api().await?;
        let url = format!("{}/api/v1/namespaces/{}/pods", api.server, self.namespace);

        let mut request = api.client.get(&url);
        if let Some(token) = &api.token {
            request = request.bearer_auth(token);
        }
        let pods: PodList = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Invalid pod list")?;

        Ok(pod_addresses(&pods, self.port))
    }

    fn name(&self) -> String {
        format!("orchestrator://{}:{}", self.namespace, self.port)
    }
}

fn pod_addresses(pods: &PodList, port: u16) -> Vec<String> {
    pods.items
        .iter()
        .filter_map(|pod| pod.status.as_ref()?.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .map(|ip| match ip.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port).to_string(),
            Err(_) => join_host_port(ip, port),
        })
        .collect()
}

struct ApiClient {
    server: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    async fn load(kubeconfig: &Path) -> anyhow::Result<Self> {
        match (
            std::env::var("KUBERNETES_SERVICE_HOST"),
            std::env::var("KUBERNETES_SERVICE_PORT"),
        ) {
            (Ok(host), Ok(port)) => Self::in_cluster(&host, &port).await,
            _ => Self::from_kubeconfig(kubeconfig).await,
        }
    }

    async fn in_cluster(host: &str, port: &str) -> anyhow::Result<Self> {
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = tokio::fs::read_to_string(dir.join("token"))
            .await
            .context("Failed to read service account token")?;
        let ca = tokio::fs::read(dir.join("ca.crt"))
            .await
            .context("Failed to read service account CA")?;

        let port = port.parse().context("Invalid KUBERNETES_SERVICE_PORT")?;
        let server = format!("https://{}", join_host_port(host, port));
        info!(%server, "Using in-cluster orchestrator credentials");

        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .build()?;
        Ok(Self {
            server,
            token: Some(token.trim().to_string()),
            client,
        })
    }

    async fn from_kubeconfig(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
        let config: Kubeconfig =
            serde_yaml::from_str(&contents).context("Failed to parse kubeconfig")?;

        let context = match &config.current_context {
            Some(name) => config.contexts.iter().find(|c| &c.name == name),
            None => config.contexts.first(),
        }
        .ok_or_else(|| anyhow!("kubeconfig has no usable context"))?;
        let cluster = config
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| anyhow!("cluster {} not found", context.context.cluster))?;
        let token = context.context.user.as_ref().and_then(|name| {
            config
                .users
                .iter()
                .find(|u| &u.name == name)
                .and_then(|u| u.user.token.clone())
        });

        let mut builder = reqwest::Client::builder().timeout(API_TIMEOUT);
        if cluster.cluster.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(data) = &cluster.cluster.certificate_authority_data {
            let pem = STANDARD
                .decode(data.trim())
                .context("Invalid certificate-authority-data")?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        } else if let Some(ca_path) = &cluster.cluster.certificate_authority {
            let pem = tokio::fs::read(ca_path)
                .await
                .with_context(|| format!("Failed to read {}", ca_path.display()))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        info!(server = %cluster.cluster.server, context = %context.name, "Using kubeconfig credentials");
        Ok(Self {
            server: cluster.cluster.server.trim_end_matches('/').to_string(),
            token,
            client: builder.build()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default, rename = "podIP")]
    pod_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeContext,
}

#[derive(Debug, Deserialize)]
struct KubeContext {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    token: Option<String>,
}
