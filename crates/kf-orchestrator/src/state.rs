//! Global orchestrator state

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use kf_core::config::ForwarderConfig;
use kf_core::store::ConfigStore;

use crate::cluster::ClusterClient;
use crate::monitor::{ConnectivityProbe, NetworkMonitor};
use crate::orchestrator::Orchestrator;
use crate::resources::ResourceTracker;

/// Global state for the orchestrator daemon
pub struct OrchestratorState {
    /// Configuration
    pub config: Arc<ForwarderConfig>,
    /// Session fan-out and registry
    pub orchestrator: Arc<Orchestrator>,
    /// Proxy resource audit
    pub tracker: ResourceTracker,
    /// Connectivity monitor; run it with `NetworkMonitor::run`
    pub monitor: Arc<NetworkMonitor>,
    /// Daemon start time
    pub start_time: Instant,
}

impl OrchestratorState {
    pub fn new(
        config: ForwarderConfig,
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn ConfigStore>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let config = Arc::new(config);
        // Assume online until the first probe says otherwise
        let (connectivity_tx, connectivity_rx) = watch::channel(true);

        let orchestrator = Arc::new(Orchestrator::new(
            cluster,
            store,
            Arc::clone(&config),
            connectivity_rx,
        ));
        let monitor = Arc::new(NetworkMonitor::new(
            probe,
            Arc::clone(orchestrator.registry()),
            connectivity_tx,
            config.monitor.interval,
        ));
        let tracker = ResourceTracker::new(Arc::clone(&orchestrator));

        Self {
            config,
            orchestrator,
            tracker,
            monitor,
            start_time: Instant::now(),
        }
    }

    /// Seconds since the daemon started
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
