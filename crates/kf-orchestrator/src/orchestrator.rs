//! Orchestrator: start/stop fan-out over the session registry
//!
//! Every batch operation spawns one task per configuration and joins them,
//! so one slow or failing config never holds up the rest. Operations on
//! the same config id are serialized by the registry's per-id lock.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, watch};

use kf_core::config::ForwarderConfig;
use kf_core::ipc::{CommandStatus, ConfigState, IpcEvent, SessionInfo};
use kf_core::store::ConfigStore;
use kf_core::{ConfigId, Configuration, ForwardError, ForwardMode};

use crate::cluster::ClusterClient;
use crate::registry::SessionRegistry;
use crate::session::{ForwardSession, SessionContext};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Address used when a config names none
const DEFAULT_LOCAL_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Public coordinator for forward sessions
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn ConfigStore>,
    ctx: SessionContext,
    next_instance: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn ConfigStore>,
        settings: Arc<ForwarderConfig>,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = SessionContext {
            cluster,
            settings,
            connectivity,
            events,
            registry: Arc::downgrade(&registry),
        };

        Self {
            registry,
            store,
            ctx,
            next_instance: AtomicU64::new(1),
        }
    }

    /// Start a batch; one result per config, in request order
    pub async fn start(self: &Arc<Self>, configs: Vec<Configuration>) -> Vec<CommandStatus> {
        let tasks = configs.into_iter().map(|config| {
            let id = config.id;
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.start_one(config).await });
            (id, handle)
        });
        let (ids, handles): (Vec<_>, Vec<_>) = tasks.unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| {
                joined.unwrap_or_else(|e| {
                    tracing::error!("Start task for config {} died: {}", id, e);
                    CommandStatus::failed(id, &ForwardError::Io(format!("start task: {}", e)))
                })
            })
            .collect()
    }

    /// Start one configuration
    pub async fn start_one(&self, config: Configuration) -> CommandStatus {
        let id = config.id;
        let _guard = self.registry.lock(id).await;

        match self.try_start(config).await {
            Ok(session) => {
                let local_address = session.local_addr().to_string();
                if let Err(e) = self.registry.insert(session.clone()) {
                    session.stop().await;
                    return CommandStatus::failed(id, &e);
                }
                self.emit(IpcEvent::ConfigStateChanged {
                    config_id: id,
                    is_running: true,
                });
                CommandStatus::running(id, local_address)
            }
            Err(e) => {
                tracing::warn!("Failed to start config {}: {}", id, e);
                CommandStatus::failed(id, &e)
            }
        }
    }

    async fn try_start(&self, config: Configuration) -> Result<Arc<ForwardSession>, ForwardError> {
        if self.registry.contains(config.id) {
            return Err(ForwardError::AlreadyRunning(config.id));
        }
        if config.id.is_unassigned() {
            return Err(ForwardError::InvalidConfig(
                "config has no id; save it first".to_string(),
            ));
        }
        config.validate()?;
        let mode = ForwardMode::classify(&config)?;

        let local_ip = self.local_ip(&config)?;
        let requested = SocketAddr::new(local_ip, config.local_port);
        if let Some(owner) = self.registry.find_binding(requested) {
            return Err(ForwardError::AddressInUse {
                address: requested.to_string(),
                owner,
            });
        }

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        ForwardSession::start(config, mode, local_ip, instance, self.ctx.clone()).await
    }

    /// Explicit address, else a free loopback alias, else 127.0.0.1
    fn local_ip(&self, config: &Configuration) -> Result<IpAddr, ForwardError> {
        if let Some(address) = config.local_address.as_deref().filter(|a| !a.trim().is_empty()) {
            return address.trim().parse().map_err(|_| {
                ForwardError::InvalidConfig(format!("invalid local address '{}'", address))
            });
        }

        if config.auto_loopback_address {
            let used = self.registry.used_ips();
            return (2..=254u8)
                .map(|last| IpAddr::V4(Ipv4Addr::new(127, 0, 0, last)))
                .find(|ip| !used.contains(ip))
                .ok_or_else(|| {
                    ForwardError::AddressInUse {
                        address: "127.0.0.2-127.0.0.254".to_string(),
                        owner: config.id,
                    }
                });
        }

        Ok(IpAddr::V4(DEFAULT_LOCAL_IP))
    }

    /// Stop a batch of config ids; stopping something not running succeeds
    pub async fn stop(self: &Arc<Self>, ids: Vec<ConfigId>) -> Vec<CommandStatus> {
        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.stop_one(id).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| {
                joined.unwrap_or_else(|e| {
                    tracing::error!("Stop task for config {} died: {}", id, e);
                    CommandStatus::failed(id, &ForwardError::Io(format!("stop task: {}", e)))
                })
            })
            .collect()
    }

    /// Stop one config; cleanup problems come back as a warning
    pub async fn stop_one(&self, id: ConfigId) -> CommandStatus {
        let _guard = self.registry.lock(id).await;

        let Some(session) = self.registry.get(id) else {
            tracing::debug!("Stop for config {} ignored: {}", id, ForwardError::NotRunning(id));
            return CommandStatus::stopped(id, Some("not running".to_string()));
        };

        let warning = session.stop().await;
        if self.registry.remove_if_instance(id, session.instance()).is_some() {
            self.emit(IpcEvent::ConfigStateChanged {
                config_id: id,
                is_running: false,
            });
        }

        CommandStatus::stopped(id, warning.map(|w| w.to_string()))
    }

    /// Stop every registered session
    pub async fn stop_all(self: &Arc<Self>) -> Vec<CommandStatus> {
        let ids = self.registry.ids();
        tracing::info!("Stopping {} forwards", ids.len());
        self.stop(ids).await
    }

    /// Start every stored config that is not already running
    pub async fn start_all(self: &Arc<Self>) -> Result<Vec<CommandStatus>, ForwardError> {
        let configs: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|c| !self.registry.contains(c.id))
            .collect();
        Ok(self.start(configs).await)
    }

    /// Stop a proxy forward, then sweep any proxy pods still labelled with its id
    pub async fn stop_proxy_forward(&self, id: ConfigId, namespace: &str) -> CommandStatus {
        let cluster = match self.registry.get(id) {
            Some(session) => Some(session.config().cluster()),
            None => self.store.get(id).await.ok().flatten().map(|c| c.cluster()),
        };

        let mut status = self.stop_one(id).await;

        let Some(cluster) = cluster else {
            return status;
        };
        let timeout = self.ctx.settings.cleanup_timeout;
        let sweep = self
            .ctx
            .cluster
            .delete_config_resources(&cluster, namespace, id);
        let problem = match tokio::time::timeout(timeout, sweep).await {
            Ok(Ok(0)) => None,
            Ok(Ok(n)) => {
                tracing::info!("Removed {} leftover proxy pods for config {}", n, id);
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("proxy sweep in {} timed out after {:?}", namespace, timeout)),
        };
        if let Some(problem) = problem {
            tracing::warn!("Proxy sweep for config {} incomplete: {}", id, problem);
            let warning = ForwardError::ResourceCleanupIncomplete(problem);
            status.warning.get_or_insert_with(|| warning.to_string());
        }
        status
    }

    /// Running flag per config; pure read of the registry
    pub fn status(&self, id: ConfigId) -> bool {
        self.registry.is_running(id)
    }

    /// Running flags for every stored config plus anything registered
    pub async fn config_states(&self) -> Result<Vec<ConfigState>, ForwardError> {
        let mut ids: Vec<ConfigId> = self.store.list().await?.iter().map(|c| c.id).collect();
        ids.extend(self.registry.ids());
        ids.sort();
        ids.dedup();

        Ok(ids
            .into_iter()
            .map(|config_id| ConfigState {
                config_id,
                is_running: self.status(config_id),
            })
            .collect())
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().iter().map(|s| s.info()).collect()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.ctx.cluster
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn settings(&self) -> &ForwarderConfig {
        &self.ctx.settings
    }

    pub fn event_sender(&self) -> broadcast::Sender<IpcEvent> {
        self.ctx.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IpcEvent> {
        self.ctx.events.subscribe()
    }

    fn emit(&self, event: IpcEvent) {
        // No receivers is fine
        let _ = self.ctx.events.send(event);
    }
}
