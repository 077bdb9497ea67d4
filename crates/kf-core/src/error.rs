//! Core error types for kftray

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ConfigId;

/// Errors raised while starting, running or stopping a forward
///
/// Variants carry rendered messages rather than source errors so a failure
/// can be stored on a session and reported to several callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// A session for this config is already registered
    #[error("Port forward for config {0} is already running")]
    AlreadyRunning(ConfigId),

    /// No session is registered for this config
    #[error("Port forward for config {0} is not running")]
    NotRunning(ConfigId),

    /// Namespace, service or pod is missing
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Cluster rejected our credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Cluster or upstream refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Workload/protocol combination with no forwarding strategy
    #[error("Unsupported workload type '{workload_type}' with protocol '{protocol}'")]
    UnsupportedWorkload {
        workload_type: String,
        protocol: String,
    },

    /// Remote cleanup did not finish; local state is already gone
    #[error("Resource cleanup incomplete: {0}")]
    ResourceCleanupIncomplete(String),

    /// Configuration is missing required values
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Local address is held by another running config
    #[error("Local address {address} is already used by config {owner}")]
    AddressInUse { address: String, owner: ConfigId },

    /// Config id not present in the store
    #[error("Unknown config: {0}")]
    UnknownConfig(ConfigId),

    /// Any other cluster API failure
    #[error("Cluster API error: {0}")]
    Cluster(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl ForwardError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::AlreadyRunning(_) => "already_running",
            ForwardError::NotRunning(_) => "not_running",
            ForwardError::TargetNotFound(_) => "target_not_found",
            ForwardError::Unauthorized(_) => "unauthorized",
            ForwardError::ConnectionRefused(_) => "connection_refused",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::UnsupportedWorkload { .. } => "unsupported_workload",
            ForwardError::ResourceCleanupIncomplete(_) => "resource_cleanup_incomplete",
            ForwardError::InvalidConfig(_) => "invalid_config",
            ForwardError::AddressInUse { .. } => "address_in_use",
            ForwardError::UnknownConfig(_) => "unknown_config",
            ForwardError::Cluster(_) => "cluster",
            ForwardError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for ForwardError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => ForwardError::ConnectionRefused(e.to_string()),
            std::io::ErrorKind::TimedOut => ForwardError::Timeout(e.to_string()),
            _ => ForwardError::Io(e.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ForwardError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        ForwardError::Timeout(e.to_string())
    }
}

impl From<StoreError> for ForwardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ForwardError::UnknownConfig(id),
            other => ForwardError::Io(format!("config store: {}", other)),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Config Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// No configuration with this id
    #[error("Config not found: {0}")]
    NotFound(ConfigId),

    /// Import payload was not a list of configurations
    #[error("Invalid import: {0}")]
    InvalidImport(String),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(ForwardError::from(refused).kind(), "connection_refused");

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(ForwardError::from(timed_out).kind(), "timeout");

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(ForwardError::from(other).kind(), "io");
    }

    #[test]
    fn test_error_messages() {
        let err = ForwardError::AlreadyRunning(ConfigId(3));
        assert_eq!(err.to_string(), "Port forward for config 3 is already running");

        let err = ForwardError::UnsupportedWorkload {
            workload_type: "job".into(),
            protocol: "tcp".into(),
        };
        assert!(err.to_string().contains("'job'"));
    }
}
