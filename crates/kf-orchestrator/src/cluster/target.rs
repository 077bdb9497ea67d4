//! Pure helpers for turning services and pods into a forwardable port

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use kf_core::ipc::PortInfo;

/// Whether the pod reports condition `Ready=True`
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// First ready pod, optionally restricted to a name prefix
pub fn pick_ready_pod<'a>(pods: &'a [Pod], name_prefix: Option<&str>) -> Option<&'a Pod> {
    pods.iter().filter(|pod| is_pod_ready(pod)).find(|pod| {
        match (name_prefix, pod.metadata.name.as_deref()) {
            (Some(prefix), Some(name)) => name.starts_with(prefix),
            (Some(_), None) => false,
            (None, _) => true,
        }
    })
}

/// Render a label map as a selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Container port carrying the given name
pub fn named_container_port(pod: &Pod, name: &str) -> Option<u16> {
    pod.spec.as_ref()?.containers.iter().find_map(|container| {
        container
            .ports
            .as_ref()?
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .and_then(|p| u16::try_from(p.container_port).ok())
    })
}

/// Pod port to forward to for a service port
///
/// The service port's `targetPort` wins when the configured port matches a
/// service port; named target ports are looked up on the pod. Anything that
/// cannot be resolved falls back to the configured port.
pub fn resolve_target_port(service: Option<&Service>, pod: &Pod, remote_port: u16) -> u16 {
    let service_port = service
        .and_then(|svc| svc.spec.as_ref())
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| p.port == i32::from(remote_port)));

    match service_port.and_then(|p| p.target_port.as_ref()) {
        Some(IntOrString::Int(port)) => u16::try_from(*port).unwrap_or(remote_port),
        Some(IntOrString::String(name)) => named_container_port(pod, name).unwrap_or(remote_port),
        None => remote_port,
    }
}

/// Ports a service exposes
pub fn service_ports(service: &Service) -> Vec<PortInfo> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| {
                    u16::try_from(p.port).ok().map(|port| PortInfo {
                        name: p.name.clone(),
                        port,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
