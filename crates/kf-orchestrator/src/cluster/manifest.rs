//! Proxy pod naming, labels and manifest

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::api::core::v1::Pod;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;

use kf_core::config::ProxyConfig;
use kf_core::time::current_time_secs;
use kf_core::{ClusterRef, ConfigId, Configuration, ForwardError, ProxyResource, ResourceKind};

/// Label marking every object kftray creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "kftray";

/// Label carrying the owning configuration id
pub const CONFIG_ID_LABEL: &str = "config_id";

/// Common prefix of proxy pod names
pub const PROXY_NAME_PREFIX: &str = "kftray-forward";

const MAX_NAME_LEN: usize = 63;

/// Selector matching everything kftray manages
pub fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE)
}

/// Selector matching the resources of one configuration
pub fn config_selector(config_id: ConfigId) -> String {
    format!("{},{}={}", managed_selector(), CONFIG_ID_LABEL, config_id)
}

/// Lowercase alphanumeric form of a login name, `unknown` if nothing is left
pub fn sanitize_username(raw: &str) -> String {
    let clean: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if clean.is_empty() {
        "unknown".to_string()
    } else {
        clean
    }
}

/// Sanitized name of the local user
pub fn current_user() -> String {
    sanitize_username(&whoami::username())
}

/// Prefix shared by every proxy pod the given user creates
pub fn user_prefix(user: &str) -> String {
    format!("{}-{}-", PROXY_NAME_PREFIX, user)
}

/// Unique proxy pod name: `kftray-forward-<user>-<proto>-<secs>-<rand6>`
pub fn proxy_pod_name(user: &str, protocol: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    let mut name = format!(
        "{}{}-{}-{}",
        user_prefix(user),
        protocol.to_ascii_lowercase(),
        current_time_secs(),
        suffix
    );
    name.truncate(MAX_NAME_LEN);
    name.trim_end_matches('-').to_string()
}

/// Pod running the relay server that forwards to `destination:remote_port`
pub fn proxy_pod(
    name: &str,
    config: &Configuration,
    destination: &str,
    proxy_type: &str,
    settings: &ProxyConfig,
) -> Result<Pod, ForwardError> {
    let port = config.remote_port.to_string();
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": config.namespace,
            "labels": {
                "app": name,
                CONFIG_ID_LABEL: config.id.to_string(),
                MANAGED_BY_LABEL: MANAGED_BY_VALUE,
            }
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": "proxy",
                "image": settings.image,
                "env": [
                    { "name": "LOCAL_PORT", "value": port },
                    { "name": "REMOTE_PORT", "value": port },
                    { "name": "REMOTE_ADDRESS", "value": destination },
                    { "name": "PROXY_TYPE", "value": proxy_type },
                    { "name": "RUST_LOG", "value": settings.log_level },
                ],
                "resources": {
                    "limits": { "cpu": "100m", "memory": "200Mi" },
                    "requests": { "cpu": "100m", "memory": "100Mi" }
                }
            }]
        }
    });

    serde_json::from_value(manifest)
        .map_err(|e| ForwardError::InvalidConfig(format!("proxy manifest: {}", e)))
}

/// Owning config id from an object's labels
pub fn config_id_of(labels: Option<&BTreeMap<String, String>>) -> Option<ConfigId> {
    labels?.get(CONFIG_ID_LABEL)?.parse().ok()
}

/// Describe a listed object as a proxy resource
pub fn resource_from_meta(
    cluster: &ClusterRef,
    kind: ResourceKind,
    meta: &ObjectMeta,
    status: String,
) -> ProxyResource {
    ProxyResource {
        cluster: cluster.clone(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        kind,
        name: meta.name.clone().unwrap_or_default(),
        config_id: config_id_of(meta.labels.as_ref()),
        created_at_millis: meta
            .creation_timestamp
            .as_ref()
            .and_then(|t| u64::try_from(t.0.timestamp_millis()).ok()),
        status,
        orphaned: false,
    }
}
