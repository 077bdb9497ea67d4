//! Cluster Client Adapter
//!
//! Translates a configuration into a live byte-stream into the cluster.
//! The adapter never retries: a failure is mapped onto the `ForwardError`
//! taxonomy and handed back to the session, which owns the retry policy.

mod error;
mod kubernetes;
pub mod manifest;
mod pool;
mod stream;
pub mod target;

pub use kubernetes::KubeCluster;
pub use error::map_kube_error;
pub use pool::ClientPool;
pub use stream::PortForwardStream;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use kf_core::ipc::PortInfo;
use kf_core::{ClusterRef, ConfigId, Configuration, Endpoint, ForwardError, ProxyResource, ProxyTarget};

/// Duplex byte-stream to a pod port
pub trait PortStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PortStream for T {}

/// Owned, type-erased pod stream
pub type BoxedStream = Box<dyn PortStream>;

/// A proxy pod that reached Running, plus a verified stream to it
pub struct ProxyDeployment {
    pub resource: ProxyResource,
    pub endpoint: Endpoint,
    pub stream: BoxedStream,
}

/// Access to cluster APIs for one or more contexts
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Find the pod and container port a direct forward should use
    async fn resolve_target(&self, config: &Configuration) -> Result<Endpoint, ForwardError>;

    /// Open a new stream to a pod port
    async fn open_stream(&self, endpoint: &Endpoint) -> Result<BoxedStream, ForwardError>;

    /// Resolve the target and open a stream to it
    async fn open_direct_forward(
        &self,
        config: &Configuration,
    ) -> Result<(Endpoint, BoxedStream), ForwardError> {
        let endpoint = self.resolve_target(config).await?;
        let stream = self.open_stream(&endpoint).await?;
        Ok((endpoint, stream))
    }

    /// Create a proxy pod and open a stream to it
    ///
    /// On error nothing is left behind in the cluster: a pod created before
    /// the failure has already been deleted.
    async fn deploy_proxy(
        &self,
        config: &Configuration,
        target: ProxyTarget,
    ) -> Result<ProxyDeployment, ForwardError>;

    /// Delete a proxy resource created by `deploy_proxy`; already-gone is success
    async fn teardown_proxy(&self, resource: &ProxyResource) -> Result<(), ForwardError>;

    /// Resources managed by kftray, in one namespace or all of them
    async fn list_resources(
        &self,
        cluster: &ClusterRef,
        namespace: Option<&str>,
    ) -> Result<Vec<ProxyResource>, ForwardError>;

    /// Delete any managed resource immediately
    async fn delete_resource(&self, resource: &ProxyResource) -> Result<(), ForwardError>;

    /// Delete this user's proxy pods labelled with a config id; returns how many
    async fn delete_config_resources(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
        config_id: ConfigId,
    ) -> Result<usize, ForwardError>;

    /// Context names in a kubeconfig
    async fn list_contexts(&self, kubeconfig: Option<&str>) -> Result<Vec<String>, ForwardError>;

    async fn list_namespaces(&self, cluster: &ClusterRef) -> Result<Vec<String>, ForwardError>;

    async fn list_services(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
    ) -> Result<Vec<String>, ForwardError>;

    /// Distinct pod label sets, rendered as `k=v,k2=v2`
    async fn list_pods(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
    ) -> Result<Vec<String>, ForwardError>;

    async fn list_ports(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<PortInfo>, ForwardError>;
}
