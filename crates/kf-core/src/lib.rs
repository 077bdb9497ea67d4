//! kf-core: Core abstractions and configuration for kftray
//!
//! This crate provides the forwarding configuration model, the error
//! taxonomy, daemon settings, IPC messages and the Config Store used by
//! the orchestrator and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod store;
pub mod time;
pub mod types;

pub use error::{ConfigError, ForwardError, StoreError};
pub use types::{
    ClusterRef, ConfigId, Configuration, DirectTarget, Endpoint, ForwardMode, Protocol,
    ProxyResource, ProxyTarget, ResourceKind, SessionState,
};
