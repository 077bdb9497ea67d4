//! IPC client for communicating with orchestrator
//!
//! Uses TCP on localhost for cross-platform compatibility.

mod client;

pub use client::OrchestratorClient;

// Re-export constants and types from kf_core
pub use kf_core::ipc::{
    default_ipc_address, CommandOutcome, CommandStatus, ConfigState, NamespaceResources,
    OrchestratorStatus, ResourceInfo, SessionInfo, DEFAULT_IPC_PORT,
};
