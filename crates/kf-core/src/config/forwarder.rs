//! Orchestrator daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the forwarding daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// IPC port for CLI/desktop communication (localhost only)
    pub ipc_port: u16,

    /// Deadline for opening a stream to a pod
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Upper bound on remote cleanup during a stop
    #[serde(with = "duration_secs")]
    pub cleanup_timeout: Duration,

    /// Where the Config Store keeps its JSON file
    pub store_path: PathBuf,

    /// Reconnect policy for broken sessions
    pub reconnect: ReconnectConfig,

    /// Connectivity monitor settings
    pub monitor: MonitorConfig,

    /// Proxy pod settings
    pub proxy: ProxyConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            ipc_port: crate::ipc::DEFAULT_IPC_PORT,
            connect_timeout: Duration::from_secs(10),
            cleanup_timeout: Duration::from_secs(10),
            store_path: super::default_config_dir().join("configs.json"),
            reconnect: ReconnectConfig::default(),
            monitor: MonitorConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl ForwarderConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }
}

/// Exponential backoff and retry budget for the reconnect path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Failed attempts before the session is marked failed
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: 5,
        }
    }
}

/// Network monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between connectivity probes
    #[serde(with = "duration_secs")]
    pub interval: Duration,

    /// Deadline for each probe connection
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,

    /// host:port endpoints; reachable if any one accepts a TCP connection
    pub endpoints: Vec<String>,

    /// How long a pooled cluster client is reused
    #[serde(with = "duration_secs")]
    pub client_ttl: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(2000),
            endpoints: vec![
                "1.1.1.1:53".to_string(),
                "8.8.8.8:53".to_string(),
                "9.9.9.9:53".to_string(),
            ],
            client_ttl: Duration::from_secs(3600),
        }
    }
}

/// In-cluster proxy pod settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Container image running the relay server
    pub image: String,

    /// How long to wait for the pod to reach Running
    #[serde(with = "duration_secs")]
    pub ready_timeout: Duration,

    /// Log filter handed to the proxy container
    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            image: "ghcr.io/hcavarsan/kftray-server:latest".to_string(),
            ready_timeout: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}
