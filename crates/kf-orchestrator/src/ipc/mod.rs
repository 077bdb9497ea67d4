//! IPC server for CLI/desktop communication
//!
//! Provides a localhost JSON-lines server that the desktop app and CLI
//! use to drive the running orchestrator daemon.

mod server;

pub use server::IpcServer;
