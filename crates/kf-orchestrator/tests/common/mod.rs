//! Shared fixtures for orchestrator integration tests
//!
//! `FakeCluster` stands in for the Kubernetes API: every stream it opens is
//! an in-memory echo, and proxy pods are plain entries in a map.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use kf_core::config::{ForwarderConfig, ReconnectConfig};
use kf_core::ipc::PortInfo;
use kf_core::store::{ConfigStore, MemoryStore};
use kf_core::{
    ClusterRef, ConfigId, Configuration, Endpoint, ForwardError, ProxyResource, ProxyTarget,
    ResourceKind, SessionState,
};
use kf_orchestrator::cluster::{BoxedStream, ClusterClient, ProxyDeployment};
use kf_orchestrator::session::ForwardSession;
use kf_orchestrator::Orchestrator;

const PROXY_PREFIX: &str = "kftray-forward-test-";

/// In-memory cluster whose streams echo every byte back
pub struct FakeCluster {
    resources: DashMap<String, ProxyResource>,
    fail_open: AtomicBool,
    fail_resolve: AtomicBool,
    teardown_delay: Mutex<Option<Duration>>,
    deploy_delay: Mutex<Option<Duration>>,
    sweep_delay: Mutex<Option<Duration>>,
    links: Mutex<CancellationToken>,
    opens: AtomicUsize,
    deploys: AtomicUsize,
    next_pod: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            fail_open: AtomicBool::new(false),
            fail_resolve: AtomicBool::new(false),
            teardown_delay: Mutex::new(None),
            deploy_delay: Mutex::new(None),
            sweep_delay: Mutex::new(None),
            links: Mutex::new(CancellationToken::new()),
            opens: AtomicUsize::new(0),
            deploys: AtomicUsize::new(0),
            next_pod: AtomicUsize::new(1),
        }
    }

    /// Refuse every new stream (and proxy deploy) while set
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Report every direct target as missing while set
    pub fn set_fail_resolve(&self, fail: bool) {
        self.fail_resolve.store(fail, Ordering::SeqCst);
    }

    /// Make proxy teardown take this long
    pub fn set_teardown_delay(&self, delay: Duration) {
        *self.teardown_delay.lock().unwrap() = Some(delay);
    }

    /// Make label sweeps of a config's pods take this long
    pub fn set_sweep_delay(&self, delay: Duration) {
        *self.sweep_delay.lock().unwrap() = Some(delay);
    }

    /// Make proxy deploys wait this long after the pod is created,
    /// like a pod that is slow to become ready
    pub fn set_deploy_delay(&self, delay: Duration) {
        *self.deploy_delay.lock().unwrap() = Some(delay);
    }

    /// Close every stream opened so far
    pub fn sever(&self) {
        let mut links = self.links.lock().unwrap();
        links.cancel();
        *links = CancellationToken::new();
    }

    /// Delete a proxy pod behind the orchestrator's back
    pub fn vanish(&self, name: &str) {
        self.resources.remove(name);
    }

    /// Seed a resource, e.g. a leftover from an earlier run
    pub fn insert_resource(&self, resource: ProxyResource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    pub fn resources(&self) -> Vec<ProxyResource> {
        self.resources.iter().map(|r| r.value().clone()).collect()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn deploys(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }

    fn echo_stream(&self) -> BoxedStream {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let link = self.links.lock().unwrap().clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = link.cancelled() => break,
                    read = server.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if server.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    },
                }
            }
        });

        Box::new(client)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn resolve_target(&self, config: &Configuration) -> Result<Endpoint, ForwardError> {
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(ForwardError::TargetNotFound(format!(
                "service {}/{}",
                config.namespace, config.target
            )));
        }
        Ok(Endpoint {
            cluster: config.cluster(),
            namespace: config.namespace.clone(),
            pod: format!("{}-0", config.target),
            port: config.remote_port,
        })
    }

    async fn open_stream(&self, endpoint: &Endpoint) -> Result<BoxedStream, ForwardError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ForwardError::ConnectionRefused(format!("{} refused", endpoint)));
        }
        if endpoint.pod.starts_with(PROXY_PREFIX) && !self.resources.contains_key(&endpoint.pod) {
            return Err(ForwardError::TargetNotFound(format!("pod {}", endpoint.pod)));
        }
        Ok(self.echo_stream())
    }

    async fn deploy_proxy(
        &self,
        config: &Configuration,
        target: ProxyTarget,
    ) -> Result<ProxyDeployment, ForwardError> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ForwardError::ConnectionRefused("proxy pod unreachable".into()));
        }

        let protocol = match target {
            ProxyTarget::UdpService | ProxyTarget::UdpPod => "udp".to_string(),
            ProxyTarget::Remote(p) => p.to_string(),
        };
        let name = format!(
            "{}{}-{}",
            PROXY_PREFIX,
            protocol,
            self.next_pod.fetch_add(1, Ordering::SeqCst)
        );
        let resource = ProxyResource {
            cluster: config.cluster(),
            namespace: config.namespace.clone(),
            kind: ResourceKind::Pod,
            name: name.clone(),
            config_id: Some(config.id),
            created_at_millis: None,
            status: "Running".into(),
            orphaned: false,
        };
        self.resources.insert(name.clone(), resource.clone());

        let delay = *self.deploy_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(ProxyDeployment {
            endpoint: Endpoint {
                cluster: config.cluster(),
                namespace: config.namespace.clone(),
                pod: name,
                port: config.remote_port,
            },
            resource,
            stream: self.echo_stream(),
        })
    }

    async fn teardown_proxy(&self, resource: &ProxyResource) -> Result<(), ForwardError> {
        let delay = *self.teardown_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.resources.remove(&resource.name);
        Ok(())
    }

    async fn list_resources(
        &self,
        cluster: &ClusterRef,
        namespace: Option<&str>,
    ) -> Result<Vec<ProxyResource>, ForwardError> {
        Ok(self
            .resources
            .iter()
            .map(|r| r.value().clone())
            .filter(|r| &r.cluster == cluster)
            .filter(|r| namespace.map_or(true, |ns| r.namespace == ns))
            .collect())
    }

    async fn delete_resource(&self, resource: &ProxyResource) -> Result<(), ForwardError> {
        self.resources.remove(&resource.name);
        Ok(())
    }

    async fn delete_config_resources(
        &self,
        _cluster: &ClusterRef,
        namespace: &str,
        config_id: ConfigId,
    ) -> Result<usize, ForwardError> {
        let delay = *self.sweep_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let before = self.resources.len();
        self.resources
            .retain(|_, r| !(r.namespace == namespace && r.config_id == Some(config_id)));
        Ok(before - self.resources.len())
    }

    async fn list_contexts(&self, _kubeconfig: Option<&str>) -> Result<Vec<String>, ForwardError> {
        Ok(vec!["kind-test".into()])
    }

    async fn list_namespaces(&self, _cluster: &ClusterRef) -> Result<Vec<String>, ForwardError> {
        Ok(vec!["default".into(), "kube-system".into()])
    }

    async fn list_services(
        &self,
        _cluster: &ClusterRef,
        _namespace: &str,
    ) -> Result<Vec<String>, ForwardError> {
        Ok(vec!["redis".into()])
    }

    async fn list_pods(
        &self,
        _cluster: &ClusterRef,
        _namespace: &str,
    ) -> Result<Vec<String>, ForwardError> {
        Ok(vec!["app=redis".into()])
    }

    async fn list_ports(
        &self,
        _cluster: &ClusterRef,
        _namespace: &str,
        _service: &str,
    ) -> Result<Vec<PortInfo>, ForwardError> {
        Ok(vec![PortInfo {
            name: Some("redis".into()),
            port: 6379,
        }])
    }
}

/// Daemon settings with short timeouts and a small retry budget
pub fn test_settings() -> ForwarderConfig {
    ForwarderConfig {
        connect_timeout: Duration::from_secs(2),
        cleanup_timeout: Duration::from_millis(300),
        reconnect: ReconnectConfig {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 3,
        },
        ..Default::default()
    }
}

/// Orchestrator wired to a fake cluster and an in-memory store
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<MemoryStore>,
    pub connectivity: watch::Sender<bool>,
}

impl Harness {
    pub fn new(configs: Vec<Configuration>) -> Self {
        Self::with_settings(configs, test_settings())
    }

    pub fn with_settings(configs: Vec<Configuration>, settings: ForwarderConfig) -> Self {
        let cluster = Arc::new(FakeCluster::new());
        let store = Arc::new(MemoryStore::with_configs(configs));
        let (connectivity, connectivity_rx) = watch::channel(true);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&cluster) as Arc<dyn ClusterClient>,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::new(settings),
            connectivity_rx,
        ));
        Self {
            orchestrator,
            cluster,
            store,
            connectivity,
        }
    }

    pub fn session(&self, id: i64) -> Arc<ForwardSession> {
        self.orchestrator
            .registry()
            .get(ConfigId(id))
            .unwrap_or_else(|| panic!("config {} is not registered", id))
    }
}

/// TCP service forward on an ephemeral loopback port
pub fn tcp_config(id: i64) -> Configuration {
    Configuration {
        id: ConfigId(id),
        namespace: "default".into(),
        target: "redis".into(),
        workload_type: "service".into(),
        protocol: "tcp".into(),
        remote_port: 6379,
        local_address: Some("127.0.0.1".into()),
        local_port: 0,
        ..Default::default()
    }
}

/// UDP service forward through a proxy pod
pub fn udp_config(id: i64) -> Configuration {
    Configuration {
        id: ConfigId(id),
        namespace: "default".into(),
        target: "dns".into(),
        workload_type: "service".into(),
        protocol: "udp".into(),
        remote_port: 53,
        local_address: Some("127.0.0.1".into()),
        local_port: 0,
        ..Default::default()
    }
}

/// Wait until the session reaches `state`
pub async fn wait_for_state(session: &ForwardSession, state: SessionState) {
    let mut rx = session.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", state))
        .expect("state channel closed");
}

/// Wait until `check` holds, polling
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}
