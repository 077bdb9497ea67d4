//! kf-orchestrator: Local daemon running Kubernetes port-forward sessions
//!
//! The orchestrator owns every live forward on the machine. It resolves
//! configurations against the cluster, binds local listeners, deploys
//! proxy pods where a target is not directly reachable, and keeps
//! sessions alive across network drops. The CLI and desktop app talk to
//! it over the localhost IPC interface.

pub mod cluster;
pub mod ipc;
pub mod monitor;
pub mod orchestrator;
pub mod registry;
pub mod resources;
pub mod session;
pub mod state;

pub use orchestrator::Orchestrator;
pub use registry::SessionRegistry;
pub use state::OrchestratorState;
