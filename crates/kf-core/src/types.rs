//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ForwardError;

/// Identifier of a forwarding configuration
///
/// Assigned by the Config Store; `0` means "not yet saved".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConfigId(pub i64);

impl ConfigId {
    /// Create a new config ID
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Whether the store has not assigned an id yet
    pub fn is_unassigned(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConfigId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for ConfigId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ConfigId)
    }
}

/// Kubernetes API scope: a context inside a kubeconfig file
///
/// `None` values fall back to the default kubeconfig and its current context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef {
    pub context: Option<String>,
    pub kubeconfig: Option<String>,
}

impl ClusterRef {
    pub fn new(context: Option<String>, kubeconfig: Option<String>) -> Self {
        Self {
            context: context.filter(|c| !c.is_empty()),
            kubeconfig: kubeconfig.filter(|k| !k.is_empty() && k != "default"),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context.as_deref().unwrap_or("<current>"))
    }
}

/// A persisted forwarding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub id: ConfigId,
    pub context: Option<String>,
    pub kubeconfig: Option<String>,
    pub namespace: String,
    /// Service or pod name; for proxy workloads, the default remote host
    #[serde(alias = "service")]
    pub target: String,
    /// "service", "pod" or "proxy"
    pub workload_type: String,
    /// "tcp" or "udp"
    pub protocol: String,
    pub remote_address: Option<String>,
    pub remote_port: u16,
    pub local_address: Option<String>,
    pub local_port: u16,
    pub alias: Option<String>,
    pub domain_enabled: bool,
    pub auto_loopback_address: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            id: ConfigId::default(),
            context: None,
            kubeconfig: None,
            namespace: "default".to_string(),
            target: String::new(),
            workload_type: "service".to_string(),
            protocol: "tcp".to_string(),
            remote_address: None,
            remote_port: 0,
            local_address: None,
            local_port: 0,
            alias: None,
            domain_enabled: false,
            auto_loopback_address: false,
        }
    }
}

impl Configuration {
    /// Cluster scope this configuration talks to
    pub fn cluster(&self) -> ClusterRef {
        ClusterRef::new(self.context.clone(), self.kubeconfig.clone())
    }

    /// Human-readable name: alias if set, otherwise the target
    pub fn display_name(&self) -> &str {
        self.alias
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.target)
    }

    /// Check the fields every forwarding mode needs
    pub fn validate(&self) -> Result<(), ForwardError> {
        if self.namespace.trim().is_empty() {
            return Err(ForwardError::InvalidConfig(format!(
                "config {} has no namespace",
                self.id
            )));
        }
        if self.remote_port == 0 {
            return Err(ForwardError::InvalidConfig(format!(
                "config {} has no remote port",
                self.id
            )));
        }
        let has_remote = self
            .remote_address
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty());
        if self.target.trim().is_empty() && !has_remote {
            return Err(ForwardError::InvalidConfig(format!(
                "config {} has no target",
                self.id
            )));
        }
        Ok(())
    }
}

/// Transport protocol of the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(()),
        }
    }
}

/// Workload reached directly through the port-forward subresource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectTarget {
    Service,
    Pod,
}

/// Workload reached through a helper pod deployed in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyTarget {
    UdpService,
    UdpPod,
    /// Arbitrary host reachable from the cluster network
    Remote(Protocol),
}

/// Forwarding strategy, decided once when a session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    Direct(DirectTarget),
    Proxy(ProxyTarget),
}

impl ForwardMode {
    /// Resolve the strategy from the stored workload type and protocol
    pub fn classify(config: &Configuration) -> Result<Self, ForwardError> {
        let unsupported = || ForwardError::UnsupportedWorkload {
            workload_type: config.workload_type.clone(),
            protocol: config.protocol.clone(),
        };

        let protocol: Protocol = config.protocol.parse().map_err(|_| unsupported())?;
        let workload = config.workload_type.trim().to_ascii_lowercase();

        match (workload.as_str(), protocol) {
            ("service", Protocol::Tcp) => Ok(ForwardMode::Direct(DirectTarget::Service)),
            ("pod", Protocol::Tcp) => Ok(ForwardMode::Direct(DirectTarget::Pod)),
            ("service", Protocol::Udp) => Ok(ForwardMode::Proxy(ProxyTarget::UdpService)),
            ("pod", Protocol::Udp) => Ok(ForwardMode::Proxy(ProxyTarget::UdpPod)),
            (w, p) if w.starts_with("proxy") => Ok(ForwardMode::Proxy(ProxyTarget::Remote(p))),
            _ => Err(unsupported()),
        }
    }

    /// Protocol of the local listener
    pub fn protocol(&self) -> Protocol {
        match self {
            ForwardMode::Direct(_) => Protocol::Tcp,
            ForwardMode::Proxy(ProxyTarget::UdpService | ProxyTarget::UdpPod) => Protocol::Udp,
            ForwardMode::Proxy(ProxyTarget::Remote(p)) => *p,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, ForwardMode::Proxy(_))
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardMode::Direct(DirectTarget::Service) => write!(f, "direct/service"),
            ForwardMode::Direct(DirectTarget::Pod) => write!(f, "direct/pod"),
            ForwardMode::Proxy(ProxyTarget::UdpService) => write!(f, "proxy/udp-service"),
            ForwardMode::Proxy(ProxyTarget::UdpPod) => write!(f, "proxy/udp-pod"),
            ForwardMode::Proxy(ProxyTarget::Remote(p)) => write!(f, "proxy/remote-{}", p),
        }
    }
}

/// A concrete pod port a stream can be opened against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub cluster: ClusterRef,
    pub namespace: String,
    pub pod: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.pod, self.port)
    }
}

/// Kind of cluster object created for proxy forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Deployment,
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pod => write!(f, "pod"),
            ResourceKind::Deployment => write!(f, "deployment"),
            ResourceKind::Service => write!(f, "service"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = ForwardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pod" => Ok(ResourceKind::Pod),
            "deployment" => Ok(ResourceKind::Deployment),
            "service" => Ok(ResourceKind::Service),
            other => Err(ForwardError::InvalidConfig(format!(
                "unsupported resource type: {}",
                other
            ))),
        }
    }
}

/// Cluster-side object backing a proxy forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResource {
    pub cluster: ClusterRef,
    pub namespace: String,
    pub kind: ResourceKind,
    pub name: String,
    /// Owning configuration, from the `config_id` label
    pub config_id: Option<ConfigId>,
    pub created_at_millis: Option<u64>,
    pub status: String,
    /// Computed by the resource tracker
    pub orphaned: bool,
}

impl ProxyResource {
    /// Whether two values name the same cluster object
    pub fn same_object(&self, other: &ProxyResource) -> bool {
        self.cluster == other.cluster
            && self.namespace == other.namespace
            && self.kind == other.kind
            && self.name == other.name
    }
}

/// Lifecycle state of a forward session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Resolving the target and opening the transport
    Starting,
    /// Relaying traffic
    Active,
    /// Upstream broke, retrying with backoff
    Reconnecting,
    /// Explicit stop in progress
    Stopping,
    /// Torn down after a stop
    Stopped,
    /// Gave up; terminal
    Failed,
}

impl SessionState {
    /// States in which the config counts as running
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Active | SessionState::Reconnecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}
