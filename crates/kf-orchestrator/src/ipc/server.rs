//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the desktop app/CLI.
//! Uses TCP on 127.0.0.1 for cross-platform compatibility (works on Unix, macOS, Windows).

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use kf_core::ipc::{IpcEvent, IpcRequest, IpcResponse, NamespaceResources, OrchestratorStatus};
use kf_core::{ClusterRef, ForwardError, ProxyResource, ResourceKind};

use crate::state::OrchestratorState;

/// IPC server for CLI/desktop communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    /// Orchestrator state
    state: Arc<OrchestratorState>,
    /// Event broadcast channel, shared with the orchestrator
    event_tx: broadcast::Sender<IpcEvent>,
    /// Cancellation token for shutdown
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, state: Arc<OrchestratorState>) -> Self {
        let event_tx = state.orchestrator.event_sender();
        Self {
            address,
            state,
            event_tx,
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;

        tracing::info!("IPC server listening on {}", self.address);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    // Only accept connections from localhost
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let state = Arc::clone(&self.state);
                    let event_tx = self.event_tx.clone();
                    let shutdown_token = self.shutdown_token.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state, event_tx, shutdown_token).await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<OrchestratorState>,
    event_tx: broadcast::Sender<IpcEvent>,
    shutdown_token: Option<CancellationToken>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    // Set once the client sends subscribe_events
    let mut event_rx: Option<broadcast::Receiver<IpcEvent>> = None;

    loop {
        tokio::select! {
            // Handle incoming requests
            result = reader.read_until(b'\n', &mut line) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let request_line = String::from_utf8_lossy(&line).trim().to_string();
                        line.clear();
                        if request_line.is_empty() {
                            continue;
                        }

                        let response = match serde_json::from_str::<IpcRequest>(&request_line) {
                            Ok(IpcRequest::SubscribeEvents) => {
                                event_rx.get_or_insert_with(|| event_tx.subscribe());
                                tracing::debug!("IPC client subscribed to events");
                                IpcResponse::Ok
                            }
                            Ok(request) => {
                                handle_request(request, &state, shutdown_token.as_ref()).await
                            }
                            Err(e) => IpcResponse::error(format!("Invalid request: {}", e)),
                        };

                        let mut response_json = serde_json::to_string(&response)?;
                        response_json.push('\n');
                        writer.write_all(response_json.as_bytes()).await?;
                    }
                    Err(e) => {
                        return Err(e.into());
                    }
                }
            }

            // Forward events to subscribed clients
            result = next_event(&mut event_rx) => {
                match result {
                    Ok(event) => {
                        let mut event_json = serde_json::to_string(&event)?;
                        event_json.push('\n');
                        writer.write_all(event_json.as_bytes()).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC client lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Next event for a subscribed client; never resolves otherwise
async fn next_event(
    rx: &mut Option<broadcast::Receiver<IpcEvent>>,
) -> Result<IpcEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_request(
    request: IpcRequest,
    state: &OrchestratorState,
    shutdown_token: Option<&CancellationToken>,
) -> IpcResponse {
    let orchestrator = &state.orchestrator;

    match request {
        IpcRequest::StartPortForwardTcp { configs } | IpcRequest::DeployAndForwardPod { configs } => {
            IpcResponse::Results {
                results: orchestrator.start(configs).await,
            }
        }

        IpcRequest::StartAll => match orchestrator.start_all().await {
            Ok(results) => IpcResponse::Results { results },
            Err(e) => IpcResponse::from_error(&e),
        },

        IpcRequest::StopPortForward { config_id } => {
            IpcResponse::Result(orchestrator.stop_one(config_id).await)
        }

        IpcRequest::StopProxyForward {
            config_id,
            namespace,
            service_name,
            ..
        } => {
            tracing::debug!("Stopping proxy forward {} for {}", config_id, service_name);
            IpcResponse::Result(orchestrator.stop_proxy_forward(config_id, &namespace).await)
        }

        IpcRequest::StopAllPortForward => IpcResponse::Results {
            results: orchestrator.stop_all().await,
        },

        IpcRequest::GetConfigStates => match orchestrator.config_states().await {
            Ok(states) => IpcResponse::ConfigStates { states },
            Err(e) => IpcResponse::from_error(&e),
        },

        IpcRequest::ListSessions => IpcResponse::Sessions {
            sessions: orchestrator.sessions(),
        },

        IpcRequest::ListAllKftrayResources {
            context,
            kubeconfig,
        } => {
            let cluster = ClusterRef::new(context, kubeconfig);
            match state.tracker.list(&cluster, None).await {
                Ok(groups) => IpcResponse::Resources {
                    namespaces: groups.into_iter().map(NamespaceResources::from).collect(),
                },
                Err(e) => IpcResponse::from_error(&e),
            }
        }

        IpcRequest::DeleteKftrayResource {
            context,
            namespace,
            resource_type,
            resource_name,
            config_id,
            kubeconfig,
        } => {
            let kind = match resource_type.parse::<ResourceKind>() {
                Ok(kind) => kind,
                Err(e) => return IpcResponse::from_error(&e),
            };
            let resource = ProxyResource {
                cluster: ClusterRef::new(context, kubeconfig),
                namespace,
                kind,
                name: resource_name,
                config_id,
                created_at_millis: None,
                status: String::new(),
                orphaned: false,
            };
            match state.tracker.delete(&resource).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::from_error(&e),
            }
        }

        IpcRequest::CleanupAllKftrayResources {
            context,
            kubeconfig,
        } => {
            let cluster = ClusterRef::new(context, kubeconfig);
            match state.tracker.cleanup_all(&cluster).await {
                Ok(report) => IpcResponse::Message {
                    message: report.message(),
                },
                Err(e) => IpcResponse::from_error(&e),
            }
        }

        IpcRequest::ListContexts { kubeconfig } => {
            names(orchestrator.cluster().list_contexts(kubeconfig.as_deref()).await)
        }

        IpcRequest::ListNamespaces {
            context,
            kubeconfig,
        } => {
            let cluster = ClusterRef::new(context, kubeconfig);
            names(orchestrator.cluster().list_namespaces(&cluster).await)
        }

        IpcRequest::ListServices {
            context,
            kubeconfig,
            namespace,
        } => {
            let cluster = ClusterRef::new(context, kubeconfig);
            names(orchestrator.cluster().list_services(&cluster, &namespace).await)
        }

        IpcRequest::ListPods {
            context,
            kubeconfig,
            namespace,
        } => {
            let cluster = ClusterRef::new(context, kubeconfig);
            names(orchestrator.cluster().list_pods(&cluster, &namespace).await)
        }

        IpcRequest::ListPorts {
            context,
            kubeconfig,
            namespace,
            service,
        } => {
            let cluster = ClusterRef::new(context, kubeconfig);
            match orchestrator
                .cluster()
                .list_ports(&cluster, &namespace, &service)
                .await
            {
                Ok(ports) => IpcResponse::Ports { ports },
                Err(e) => IpcResponse::from_error(&e),
            }
        }

        IpcRequest::ListConfigs => match orchestrator.store().list().await {
            Ok(configs) => IpcResponse::Configs { configs },
            Err(e) => IpcResponse::from_error(&ForwardError::from(e)),
        },

        IpcRequest::GetConfig { config_id } => match orchestrator.store().get(config_id).await {
            Ok(Some(config)) => IpcResponse::Config { config },
            Ok(None) => IpcResponse::from_error(&ForwardError::UnknownConfig(config_id)),
            Err(e) => IpcResponse::from_error(&ForwardError::from(e)),
        },

        IpcRequest::SaveConfig { config } => {
            if orchestrator.registry().contains(config.id) {
                tracing::info!("Config {} saved while running; restart to apply", config.id);
            }
            match orchestrator.store().save(config).await {
                Ok(id) => IpcResponse::Message {
                    message: format!("Saved config {}", id),
                },
                Err(e) => IpcResponse::from_error(&ForwardError::from(e)),
            }
        }

        IpcRequest::DeleteConfig { config_id } => {
            if orchestrator.registry().contains(config_id) {
                let status = orchestrator.stop_one(config_id).await;
                if let Some(warning) = status.warning {
                    tracing::warn!("Stop before delete of config {}: {}", config_id, warning);
                }
            }
            match orchestrator.store().delete(config_id).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::from_error(&ForwardError::from(e)),
            }
        }

        IpcRequest::ImportConfigs { json } => match orchestrator.store().import(&json).await {
            Ok(ids) => IpcResponse::Message {
                message: format!("Imported {} configs", ids.len()),
            },
            Err(e) => IpcResponse::from_error(&ForwardError::from(e)),
        },

        IpcRequest::ExportConfigs => match orchestrator.store().export().await {
            Ok(json) => IpcResponse::Exported { json },
            Err(e) => IpcResponse::from_error(&ForwardError::from(e)),
        },

        IpcRequest::GetStatus => IpcResponse::Status(OrchestratorStatus {
            running: true,
            uptime_secs: state.uptime_secs(),
            session_count: orchestrator.registry().len(),
            network_healthy: state.monitor.is_healthy(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ipc_address: state.config.ipc_address(),
        }),

        // Handled per connection in handle_client
        IpcRequest::SubscribeEvents => IpcResponse::Ok,

        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            if let Some(token) = shutdown_token {
                token.cancel();
                IpcResponse::Ok
            } else {
                IpcResponse::error("Shutdown not supported (no shutdown token configured)")
            }
        }
    }
}

fn names(result: Result<Vec<String>, ForwardError>) -> IpcResponse {
    match result {
        Ok(names) => IpcResponse::Names { names },
        Err(e) => IpcResponse::from_error(&e),
    }
}
