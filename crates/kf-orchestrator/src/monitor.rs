//! Network monitor
//!
//! Polls reachability at a fixed interval and publishes the result on a
//! `watch` channel that every session reads. Transitions are also pushed
//! to sessions directly:
//!
//! - healthy → unhealthy: `Active` sessions are marked suspect
//! - unhealthy → healthy: reconnecting and suspect sessions retry at once
//!
//! The monitor only signals sessions; it never adds or removes registry
//! entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use kf_core::config::MonitorConfig;
use kf_core::SessionState;

use crate::registry::SessionRegistry;

/// Connectivity check used by the monitor
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachable if any endpoint accepts a TCP connection in time
pub struct TcpProbe {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.endpoints.clone(), config.probe_timeout)
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        let mut attempts: FuturesUnordered<_> = self
            .endpoints
            .iter()
            .map(|endpoint| async move {
                matches!(
                    tokio::time::timeout(self.timeout, TcpStream::connect(endpoint.as_str())).await,
                    Ok(Ok(_))
                )
            })
            .collect();

        while let Some(reachable) = attempts.next().await {
            if reachable {
                return true;
            }
        }
        false
    }
}

/// Background loop driving session recovery from connectivity changes
pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    registry: Arc<SessionRegistry>,
    connectivity: watch::Sender<bool>,
    interval: Duration,
}

impl NetworkMonitor {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        registry: Arc<SessionRegistry>,
        connectivity: watch::Sender<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            registry,
            connectivity,
            interval,
        }
    }

    /// Last published probe result
    pub fn is_healthy(&self) -> bool {
        *self.connectivity.borrow()
    }

    /// Probe once and signal sessions on a transition; returns the new health
    pub async fn poll_once(&self) -> bool {
        let healthy = self.probe.is_reachable().await;
        let was_healthy = self.connectivity.send_replace(healthy);

        match (was_healthy, healthy) {
            (true, false) => {
                tracing::warn!("Network connectivity lost");
                for session in self.registry.list() {
                    if session.state() == SessionState::Active {
                        session.mark_suspect();
                    }
                }
            }
            (false, true) => {
                tracing::info!("Network connectivity restored");
                for session in self.registry.list() {
                    if session.state() == SessionState::Reconnecting || session.is_suspect() {
                        tracing::debug!("Signalling config {} to retry", session.config_id());
                        session.retry_now();
                    }
                }
            }
            _ => {}
        }

        healthy
    }

    /// Run until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Starting network monitor (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Network monitor shutting down");
                    break;
                }
            }
        }
    }
}
