//! IPC protocol for desktop/CLI to orchestrator communication
//!
//! Uses JSON-encoded messages, one per line, over TCP on localhost
//! (127.0.0.1). Events are only pushed to clients that sent
//! `subscribe_events`, so a plain request/response client never sees them.

use serde::{Deserialize, Serialize};

use crate::error::ForwardError;
use crate::time::{elapsed_duration, format_age};
use crate::types::{ConfigId, Configuration, ProxyResource, SessionState};

/// Default IPC port on localhost
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Default IPC address (127.0.0.1:DEFAULT_IPC_PORT)
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// IPC request from client (desktop/CLI) to orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Start direct TCP forwards
    StartPortForwardTcp { configs: Vec<Configuration> },

    /// Start proxy-pod (UDP or remote) forwards
    DeployAndForwardPod { configs: Vec<Configuration> },

    /// Start every stored configuration that is not already running
    StartAll,

    /// Stop one forward
    StopPortForward { config_id: ConfigId },

    /// Stop a proxy forward and sweep proxy pods labelled with its id
    StopProxyForward {
        config_id: ConfigId,
        namespace: String,
        service_name: String,
        local_port: u16,
        remote_address: Option<String>,
        protocol: String,
    },

    /// Stop every running forward
    StopAllPortForward,

    /// Running flag for every stored configuration
    GetConfigStates,

    /// Details of every registered session
    ListSessions,

    /// Proxy resources in a context, grouped by namespace
    ListAllKftrayResources {
        context: Option<String>,
        kubeconfig: Option<String>,
    },

    /// Delete one proxy resource
    DeleteKftrayResource {
        context: Option<String>,
        namespace: String,
        resource_type: String,
        resource_name: String,
        config_id: Option<ConfigId>,
        kubeconfig: Option<String>,
    },

    /// Delete every orphaned proxy resource in a context
    CleanupAllKftrayResources {
        context: Option<String>,
        kubeconfig: Option<String>,
    },

    /// Contexts in a kubeconfig
    ListContexts { kubeconfig: Option<String> },

    /// Namespaces in a context
    ListNamespaces {
        context: Option<String>,
        kubeconfig: Option<String>,
    },

    /// Services in a namespace
    ListServices {
        context: Option<String>,
        kubeconfig: Option<String>,
        namespace: String,
    },

    /// Pod label sets in a namespace
    ListPods {
        context: Option<String>,
        kubeconfig: Option<String>,
        namespace: String,
    },

    /// Ports exposed by a service
    ListPorts {
        context: Option<String>,
        kubeconfig: Option<String>,
        namespace: String,
        service: String,
    },

    /// All stored configurations
    ListConfigs,

    /// One stored configuration
    GetConfig { config_id: ConfigId },

    /// Insert (id 0) or update a configuration
    SaveConfig { config: Configuration },

    /// Delete a configuration
    DeleteConfig { config_id: ConfigId },

    /// Import configurations from a JSON array
    ImportConfigs { json: String },

    /// Export all configurations as JSON
    ExportConfigs,

    /// Receive `IpcEvent`s on this connection from now on
    SubscribeEvents,

    /// Get orchestrator status
    GetStatus,

    /// Ping (for keepalive)
    Ping,

    /// Shutdown the orchestrator
    Shutdown,
}

/// IPC response from orchestrator to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Per-config outcomes of a batch command, in request order
    Results { results: Vec<CommandStatus> },

    /// Outcome of a single-config command
    Result(CommandStatus),

    /// Running flags
    ConfigStates { states: Vec<ConfigState> },

    /// Registered sessions
    Sessions { sessions: Vec<SessionInfo> },

    /// Proxy resources grouped by namespace
    Resources { namespaces: Vec<NamespaceResources> },

    /// Human-readable outcome
    Message { message: String },

    /// Names from a discovery call
    Names { names: Vec<String> },

    /// Ports of a service
    Ports { ports: Vec<PortInfo> },

    /// Stored configurations
    Configs { configs: Vec<Configuration> },

    /// A single stored configuration
    Config { config: Configuration },

    /// Exported configurations
    Exported { json: String },

    /// Orchestrator status
    Status(OrchestratorStatus),

    /// Generic success
    Ok,

    /// Error response
    Error {
        message: String,
        kind: Option<String>,
    },

    /// Pong response
    Pong,
}

impl IpcResponse {
    /// Error response carrying the forward error kind
    pub fn from_error(err: &ForwardError) -> Self {
        IpcResponse::Error {
            message: err.to_string(),
            kind: Some(err.kind().to_string()),
        }
    }

    /// Error response without a kind
    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
            kind: None,
        }
    }
}

/// IPC event pushed from orchestrator to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    /// A config started or stopped running
    ConfigStateChanged { config_id: ConfigId, is_running: bool },

    /// A session moved to another lifecycle state
    SessionStateChanged {
        config_id: ConfigId,
        state: SessionState,
    },
}

/// Result status of a command for one config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutcome::Running => write!(f, "running"),
            CommandOutcome::Stopped => write!(f, "stopped"),
            CommandOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a start or stop for one config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatus {
    pub config_id: ConfigId,
    pub status: CommandOutcome,
    /// Address the session listens on, for successful starts
    pub local_address: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    /// Non-fatal problem, e.g. incomplete remote cleanup
    pub warning: Option<String>,
}

impl CommandStatus {
    pub fn running(config_id: ConfigId, local_address: impl Into<String>) -> Self {
        Self {
            config_id,
            status: CommandOutcome::Running,
            local_address: Some(local_address.into()),
            error: None,
            error_kind: None,
            warning: None,
        }
    }

    pub fn stopped(config_id: ConfigId, warning: Option<String>) -> Self {
        Self {
            config_id,
            status: CommandOutcome::Stopped,
            local_address: None,
            error: None,
            error_kind: None,
            warning,
        }
    }

    pub fn failed(config_id: ConfigId, err: &ForwardError) -> Self {
        Self {
            config_id,
            status: CommandOutcome::Failed,
            local_address: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            warning: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status != CommandOutcome::Failed
    }
}

/// Running flag for a stored configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigState {
    pub config_id: ConfigId,
    pub is_running: bool,
}

/// Snapshot of a registered session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub config_id: ConfigId,
    pub name: String,
    pub state: SessionState,
    pub mode: String,
    pub protocol: String,
    pub local_address: String,
    pub started_at: u64,
    pub reconnects: u32,
    pub last_error: Option<String>,
    pub proxy_pod: Option<String>,
}

/// A proxy resource as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub resource_type: String,
    pub name: String,
    pub namespace: String,
    pub config_id: Option<ConfigId>,
    pub is_orphaned: bool,
    pub age: String,
    pub status: String,
}

impl From<ProxyResource> for ResourceInfo {
    fn from(resource: ProxyResource) -> Self {
        ResourceInfo {
            resource_type: resource.kind.to_string(),
            age: resource
                .created_at_millis
                .map(|created| format_age(elapsed_duration(created)))
                .unwrap_or_else(|| "unknown".to_string()),
            name: resource.name,
            namespace: resource.namespace,
            config_id: resource.config_id,
            is_orphaned: resource.orphaned,
            status: resource.status,
        }
    }
}

/// Resources of one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceResources {
    pub namespace: String,
    pub resources: Vec<ResourceInfo>,
}

/// A service port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub name: Option<String>,
    pub port: u16,
}

/// Orchestrator status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Whether orchestrator is running
    pub running: bool,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Number of registered sessions
    pub session_count: usize,
    /// Last connectivity probe result
    pub network_healthy: bool,
    /// Orchestrator version
    pub version: String,
    /// IPC address
    pub ipc_address: String,
}
