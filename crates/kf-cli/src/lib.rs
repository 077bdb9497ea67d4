//! kf-cli: Command-line interface for kftray
//!
//! Provides the `kftray` CLI, a thin client that drives the orchestrator
//! daemon over its localhost IPC interface.

pub mod commands;
pub mod ipc;
pub mod output;
