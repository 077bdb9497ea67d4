//! `ClusterClient` backed by the Kubernetes API

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::Client;

use kf_core::config::{ForwarderConfig, ProxyConfig};
use kf_core::ipc::PortInfo;
use kf_core::time::current_time_millis;
use kf_core::{
    ClusterRef, ConfigId, Configuration, DirectTarget, Endpoint, ForwardError, ForwardMode,
    Protocol, ProxyResource, ProxyTarget, ResourceKind,
};

use super::error::{is_not_found, map_kube_error};
use super::manifest::{self, config_selector, managed_selector};
use super::pool::{read_kubeconfig, ClientPool};
use super::stream::PortForwardStream;
use super::target::{is_pod_ready, pick_ready_pod, resolve_target_port, selector_string, service_ports};
use super::{BoxedStream, ClusterClient, ProxyDeployment};

const POD_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Kubernetes implementation of the cluster adapter
pub struct KubeCluster {
    pool: ClientPool,
    connect_timeout: Duration,
    proxy: ProxyConfig,
    user: String,
}

impl KubeCluster {
    pub fn new(settings: &ForwarderConfig) -> Self {
        Self {
            pool: ClientPool::new(settings.monitor.client_ttl),
            connect_timeout: settings.connect_timeout,
            proxy: settings.proxy.clone(),
            user: manifest::current_user(),
        }
    }

    async fn client(&self, cluster: &ClusterRef) -> Result<Client, ForwardError> {
        self.pool.client(cluster).await
    }

    async fn pods(&self, cluster: &ClusterRef, namespace: &str) -> Result<Api<Pod>, ForwardError> {
        Ok(Api::namespaced(self.client(cluster).await?, namespace))
    }

    /// Pods selected by a service, or by `app=<name>` if the service is missing
    async fn resolve_service(&self, config: &Configuration) -> Result<Endpoint, ForwardError> {
        let client = self.client(&config.cluster()).await?;
        let services: Api<Service> = Api::namespaced(client.clone(), &config.namespace);
        let pods: Api<Pod> = Api::namespaced(client, &config.namespace);

        let service = match services.get(&config.target).await {
            Ok(service) => Some(service),
            Err(e) if is_not_found(&e) => {
                tracing::debug!(
                    "Service {}/{} not found, falling back to app label",
                    config.namespace,
                    config.target
                );
                None
            }
            Err(e) => {
                return Err(map_kube_error(
                    e,
                    &format!("get service {}/{}", config.namespace, config.target),
                ))
            }
        };

        let selector = service
            .as_ref()
            .and_then(|svc| svc.spec.as_ref())
            .and_then(|spec| spec.selector.as_ref())
            .filter(|labels| !labels.is_empty())
            .map(selector_string)
            .unwrap_or_else(|| format!("app={}", config.target));

        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| map_kube_error(e, &format!("list pods {}", selector)))?;

        let pod = pick_ready_pod(&list.items, None).ok_or_else(|| {
            ForwardError::TargetNotFound(format!(
                "no ready pod for {}/{} ({})",
                config.namespace, config.target, selector
            ))
        })?;

        Ok(Endpoint {
            cluster: config.cluster(),
            namespace: config.namespace.clone(),
            pod: pod.metadata.name.clone().unwrap_or_default(),
            port: resolve_target_port(service.as_ref(), pod, config.remote_port),
        })
    }

    /// Exact pod name if ready, otherwise the first ready pod with that prefix
    async fn find_pod(&self, cluster: &ClusterRef, namespace: &str, target: &str) -> Result<Pod, ForwardError> {
        let pods = self.pods(cluster, namespace).await?;

        match pods.get(target).await {
            Ok(pod) if is_pod_ready(&pod) => return Ok(pod),
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(map_kube_error(e, &format!("get pod {}/{}", namespace, target))),
        }

        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("list pods in {}", namespace)))?;

        pick_ready_pod(&list.items, Some(target))
            .cloned()
            .ok_or_else(|| {
                ForwardError::TargetNotFound(format!("no ready pod matching {}/{}", namespace, target))
            })
    }

    /// Where the proxy pod should relay to
    async fn proxy_destination(
        &self,
        config: &Configuration,
        target: ProxyTarget,
    ) -> Result<String, ForwardError> {
        if let Some(address) = config.remote_address.as_deref().filter(|a| !a.trim().is_empty()) {
            return Ok(address.to_string());
        }

        match target {
            ProxyTarget::UdpService | ProxyTarget::Remote(_) => Ok(config.target.clone()),
            ProxyTarget::UdpPod => {
                let pod = self
                    .find_pod(&config.cluster(), &config.namespace, &config.target)
                    .await?;
                pod.status
                    .and_then(|status| status.pod_ip)
                    .ok_or_else(|| {
                        ForwardError::TargetNotFound(format!(
                            "pod {}/{} has no IP",
                            config.namespace, config.target
                        ))
                    })
            }
        }
    }

    /// Poll until the pod is Running, bounded by the proxy ready timeout
    async fn wait_running(&self, pods: &Api<Pod>, name: &str) -> Result<(), ForwardError> {
        let deadline = Instant::now() + self.proxy.ready_timeout;

        loop {
            let pod = pods
                .get(name)
                .await
                .map_err(|e| map_kube_error(e, &format!("get proxy pod {}", name)))?;

            let phase = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                .unwrap_or("Pending");

            match phase {
                "Running" => return Ok(()),
                "Failed" | "Succeeded" => {
                    return Err(ForwardError::Cluster(format!(
                        "proxy pod {} exited with phase {}",
                        name, phase
                    )))
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(ForwardError::Timeout(format!(
                    "proxy pod {} not running after {:?}",
                    name, self.proxy.ready_timeout
                )));
            }
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }

    async fn start_proxy(
        &self,
        pods: &Api<Pod>,
        name: &str,
        config: &Configuration,
        target: ProxyTarget,
    ) -> Result<(Endpoint, BoxedStream), ForwardError> {
        let destination = self.proxy_destination(config, target).await?;
        let pod = manifest::proxy_pod(name, config, &destination, proxy_type(target), &self.proxy)?;

        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| map_kube_error(e, &format!("create proxy pod {}", name)))?;
        tracing::info!(
            "Created proxy pod {}/{} for config {} -> {}:{}",
            config.namespace,
            name,
            config.id,
            destination,
            config.remote_port
        );

        self.wait_running(pods, name).await?;

        let endpoint = Endpoint {
            cluster: config.cluster(),
            namespace: config.namespace.clone(),
            pod: name.to_string(),
            port: config.remote_port,
        };
        let stream = self.open_stream(&endpoint).await?;
        Ok((endpoint, stream))
    }

    async fn delete_now<K>(&self, api: &Api<K>, name: &str) -> Result<(), ForwardError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        match api.delete(name, &immediate_delete()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(map_kube_error(e, &format!("delete {}", name))),
        }
    }

    fn is_own_pod(&self, name: &str) -> bool {
        name.starts_with(&manifest::user_prefix(&self.user))
    }
}

/// `PROXY_TYPE` the relay server expects
fn proxy_type(target: ProxyTarget) -> &'static str {
    match target {
        ProxyTarget::UdpService | ProxyTarget::UdpPod | ProxyTarget::Remote(Protocol::Udp) => "udp",
        ProxyTarget::Remote(Protocol::Tcp) => "tcp",
    }
}

fn immediate_delete() -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(0),
        propagation_policy: Some(PropagationPolicy::Background),
        ..Default::default()
    }
}

fn namespaced_or_all<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn resolve_target(&self, config: &Configuration) -> Result<Endpoint, ForwardError> {
        match ForwardMode::classify(config)? {
            ForwardMode::Direct(DirectTarget::Service) => {
                self.resolve_service(config).await
            }
            ForwardMode::Direct(DirectTarget::Pod) => {
                let pod = self
                    .find_pod(&config.cluster(), &config.namespace, &config.target)
                    .await?;
                Ok(Endpoint {
                    cluster: config.cluster(),
                    namespace: config.namespace.clone(),
                    pod: pod.metadata.name.clone().unwrap_or_default(),
                    port: resolve_target_port(None, &pod, config.remote_port),
                })
            }
            ForwardMode::Proxy(_) => Err(ForwardError::InvalidConfig(format!(
                "config {} forwards through a proxy pod",
                config.id
            ))),
        }
    }

    async fn open_stream(&self, endpoint: &Endpoint) -> Result<BoxedStream, ForwardError> {
        let pods = self.pods(&endpoint.cluster, &endpoint.namespace).await?;

        let mut forwarder = tokio::time::timeout(
            self.connect_timeout,
            pods.portforward(&endpoint.pod, &[endpoint.port]),
        )
        .await
        .map_err(|_| ForwardError::Timeout(format!("port-forward to {}", endpoint)))?
        .map_err(|e| map_kube_error(e, &format!("port-forward to {}", endpoint)))?;

        let stream = forwarder.take_stream(endpoint.port).ok_or_else(|| {
            ForwardError::ConnectionRefused(format!("no stream for {}", endpoint))
        })?;

        if let Some(error) = forwarder.take_error(endpoint.port) {
            let label = endpoint.to_string();
            tokio::spawn(async move {
                if let Some(message) = error.await {
                    tracing::warn!("Port-forward {} reported: {}", label, message);
                }
            });
        }

        Ok(Box::new(PortForwardStream::new(stream, forwarder)))
    }

    async fn deploy_proxy(
        &self,
        config: &Configuration,
        target: ProxyTarget,
    ) -> Result<ProxyDeployment, ForwardError> {
        let cluster = config.cluster();
        let pods = self.pods(&cluster, &config.namespace).await?;
        let name = manifest::proxy_pod_name(&self.user, proxy_type(target));

        match self.start_proxy(&pods, &name, config, target).await {
            Ok((endpoint, stream)) => Ok(ProxyDeployment {
                resource: ProxyResource {
                    cluster,
                    namespace: config.namespace.clone(),
                    kind: ResourceKind::Pod,
                    name,
                    config_id: Some(config.id),
                    created_at_millis: Some(current_time_millis()),
                    status: "Running".to_string(),
                    orphaned: false,
                },
                endpoint,
                stream,
            }),
            Err(err) => {
                tracing::warn!("Proxy pod {} failed to start: {}", name, err);
                if let Err(cleanup) = self.delete_now(&pods, &name).await {
                    tracing::error!("Failed to delete proxy pod {}: {}", name, cleanup);
                }
                Err(err)
            }
        }
    }

    async fn teardown_proxy(&self, resource: &ProxyResource) -> Result<(), ForwardError> {
        self.delete_resource(resource).await?;
        tracing::info!("Deleted proxy pod {}/{}", resource.namespace, resource.name);
        Ok(())
    }

    async fn list_resources(
        &self,
        cluster: &ClusterRef,
        namespace: Option<&str>,
    ) -> Result<Vec<ProxyResource>, ForwardError> {
        let client = self.client(cluster).await?;
        let params = ListParams::default().labels(&managed_selector());
        let mut resources = Vec::new();

        let pods: Api<Pod> = namespaced_or_all(client.clone(), namespace);
        let list = pods
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "list proxy pods"))?;
        for pod in list.items {
            if !pod.metadata.name.as_deref().is_some_and(|n| self.is_own_pod(n)) {
                continue;
            }
            let phase = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            resources.push(manifest::resource_from_meta(cluster, ResourceKind::Pod, &pod.metadata, phase));
        }

        let deployments: Api<Deployment> = namespaced_or_all(client.clone(), namespace);
        let list = deployments
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "list proxy deployments"))?;
        for deployment in list.items {
            let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready = deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            resources.push(manifest::resource_from_meta(
                cluster,
                ResourceKind::Deployment,
                &deployment.metadata,
                format!("{}/{}", ready, desired),
            ));
        }

        let services: Api<Service> = namespaced_or_all(client, namespace);
        let list = services
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "list proxy services"))?;
        for service in list.items {
            let kind = service
                .spec
                .as_ref()
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string());
            resources.push(manifest::resource_from_meta(cluster, ResourceKind::Service, &service.metadata, kind));
        }

        Ok(resources)
    }

    async fn delete_resource(&self, resource: &ProxyResource) -> Result<(), ForwardError> {
        let client = self.client(&resource.cluster).await?;
        let namespace = resource.namespace.as_str();

        match resource.kind {
            ResourceKind::Pod => {
                let api: Api<Pod> = Api::namespaced(client, namespace);
                self.delete_now(&api, &resource.name).await
            }
            ResourceKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);
                self.delete_now(&api, &resource.name).await
            }
            ResourceKind::Service => {
                let api: Api<Service> = Api::namespaced(client, namespace);
                self.delete_now(&api, &resource.name).await
            }
        }
    }

    async fn delete_config_resources(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
        config_id: ConfigId,
    ) -> Result<usize, ForwardError> {
        let pods = self.pods(cluster, namespace).await?;
        let list = pods
            .list(&ListParams::default().labels(&config_selector(config_id)))
            .await
            .map_err(|e| map_kube_error(e, &format!("list proxy pods for config {}", config_id)))?;

        let mut deleted = 0;
        let mut first_error = None;
        for name in list.items.iter().filter_map(|pod| pod.metadata.name.as_deref()) {
            if !self.is_own_pod(name) {
                continue;
            }
            match self.delete_now(&pods, name).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!("Failed to delete proxy pod {}/{}: {}", namespace, name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }

    async fn list_contexts(&self, kubeconfig: Option<&str>) -> Result<Vec<String>, ForwardError> {
        let path = kubeconfig.filter(|k| !k.is_empty() && *k != "default");
        let config = read_kubeconfig(path)?;
        Ok(config.contexts.into_iter().map(|c| c.name).collect())
    }

    async fn list_namespaces(&self, cluster: &ClusterRef) -> Result<Vec<String>, ForwardError> {
        let api: Api<Namespace> = Api::all(self.client(cluster).await?);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "list namespaces"))?;
        Ok(list.items.into_iter().filter_map(|ns| ns.metadata.name).collect())
    }

    async fn list_services(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
    ) -> Result<Vec<String>, ForwardError> {
        let api: Api<Service> = Api::namespaced(self.client(cluster).await?, namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("list services in {}", namespace)))?;
        Ok(list.items.into_iter().filter_map(|svc| svc.metadata.name).collect())
    }

    async fn list_pods(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
    ) -> Result<Vec<String>, ForwardError> {
        let api = self.pods(cluster, namespace).await?;
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("list pods in {}", namespace)))?;

        let label_sets: BTreeSet<String> = list
            .items
            .iter()
            .filter_map(|pod| pod.metadata.labels.as_ref())
            .filter(|labels| !labels.is_empty())
            .map(selector_string)
            .collect();
        Ok(label_sets.into_iter().collect())
    }

    async fn list_ports(
        &self,
        cluster: &ClusterRef,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<PortInfo>, ForwardError> {
        let api: Api<Service> = Api::namespaced(self.client(cluster).await?, namespace);
        let svc = api
            .get(service)
            .await
            .map_err(|e| map_kube_error(e, &format!("get service {}/{}", namespace, service)))?;
        Ok(service_ports(&svc))
    }
}
