//! Pooled Kubernetes clients keyed by (context, kubeconfig)

use dashmap::DashMap;
use std::time::{Duration, Instant};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use kf_core::{ClusterRef, ForwardError};

use super::error::map_kube_error;

struct PooledClient {
    client: Client,
    created_at: Instant,
}

/// Shares one API client per cluster scope across all sessions
///
/// Clients are rebuilt after `ttl` so rotated credentials are picked up.
pub struct ClientPool {
    clients: DashMap<ClusterRef, PooledClient>,
    ttl: Duration,
}

impl ClientPool {
    pub fn new(ttl: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            ttl,
        }
    }

    /// Get a cached client or build a new one
    pub async fn client(&self, cluster: &ClusterRef) -> Result<Client, ForwardError> {
        let cached = self.clients.get(cluster).and_then(|entry| {
            (entry.created_at.elapsed() < self.ttl).then(|| entry.client.clone())
        });
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = build_client(cluster).await?;
        tracing::debug!("Created Kubernetes client for context {}", cluster);
        self.clients.insert(
            cluster.clone(),
            PooledClient {
                client: client.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(client)
    }

}

/// Read a kubeconfig from an explicit path or the default location
pub(crate) fn read_kubeconfig(path: Option<&str>) -> Result<Kubeconfig, ForwardError> {
    let result = match path {
        Some(path) => Kubeconfig::read_from(path),
        None => Kubeconfig::read(),
    };
    result.map_err(|e| ForwardError::InvalidConfig(format!("kubeconfig: {}", e)))
}

async fn build_client(cluster: &ClusterRef) -> Result<Client, ForwardError> {
    let config = match (&cluster.context, &cluster.kubeconfig) {
        (None, None) => Config::infer()
            .await
            .map_err(|e| ForwardError::InvalidConfig(format!("kubeconfig: {}", e)))?,
        (context, kubeconfig) => {
            let kubeconfig = read_kubeconfig(kubeconfig.as_deref())?;
            let options = KubeConfigOptions {
                context: context.clone(),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    ForwardError::InvalidConfig(format!("context {}: {}", cluster, e))
                })?
        }
    };

    Client::try_from(config).map_err(|e| map_kube_error(e, "create client"))
}
