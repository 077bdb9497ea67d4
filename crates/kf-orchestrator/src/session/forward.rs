//! Forward session: one local endpoint relayed to one cluster target
//!
//! A session binds its local socket, opens the upstream and then runs a
//! single relay task until it is stopped or gives up:
//!
//! ```text
//! Starting ──► Active ──► Reconnecting ──► Active
//!                 │             │
//!                 ▼             ▼
//!             Stopping       Failed
//!                 │
//!                 ▼
//!              Stopped
//! ```
//!
//! Upstream breakage is handled inside the session. The TCP listener keeps
//! accepting while it reconnects and holds new clients until the upstream
//! is restored. While the network monitor reports the machine offline the
//! session stays `Active` and parks; retry budget is only spent on attempts
//! made while online.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use kf_core::config::ForwarderConfig;
use kf_core::ipc::{IpcEvent, SessionInfo};
use kf_core::time::current_time_millis;
use kf_core::{
    Configuration, ConfigId, Endpoint, ForwardError, ForwardMode, Protocol, ProxyResource,
    SessionState,
};
use kf_protocol::{UdpFrameCodec, MAX_PAYLOAD_SIZE};

use super::backoff::ExponentialBackoff;
use super::relay::Watched;
use crate::cluster::{BoxedStream, ClusterClient};
use crate::registry::SessionRegistry;

/// Shared collaborators handed to every session
#[derive(Clone)]
pub struct SessionContext {
    pub cluster: Arc<dyn ClusterClient>,
    pub settings: Arc<ForwarderConfig>,
    /// `true` while the network monitor sees connectivity
    pub connectivity: watch::Receiver<bool>,
    pub events: broadcast::Sender<IpcEvent>,
    /// Registry the session removes itself from when it fails
    pub registry: Weak<SessionRegistry>,
}

/// Local half of the transport, moved into the relay task
enum Transport {
    Tcp(TcpListener),
    Udp(UdpSocket, BoxedStream),
}

/// How a reconnect attempt ended
enum Outcome {
    Restored(BoxedStream),
    Cancelled,
    Exhausted(ForwardError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running forward for a single configuration
pub struct ForwardSession {
    config: Configuration,
    mode: ForwardMode,
    /// Distinguishes this session from earlier ones for the same config
    instance: u64,
    local_addr: SocketAddr,
    started_at: u64,
    ctx: SessionContext,
    state: watch::Sender<SessionState>,
    last_error: Mutex<Option<ForwardError>>,
    suspect: AtomicBool,
    retry: Notify,
    reconnects: AtomicU32,
    cancel: CancellationToken,
    endpoint: Mutex<Endpoint>,
    proxy: Mutex<Option<ProxyResource>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ForwardSession {
    /// Bind locally, open the upstream and start relaying
    ///
    /// On error nothing keeps running and no cluster resource is left.
    pub async fn start(
        config: Configuration,
        mode: ForwardMode,
        local_ip: IpAddr,
        instance: u64,
        ctx: SessionContext,
    ) -> Result<Arc<Self>, ForwardError> {
        let bind_addr = SocketAddr::new(local_ip, config.local_port);
        let bind_error = |e: std::io::Error| ForwardError::Io(format!("bind {}: {}", bind_addr, e));

        tracing::info!(
            "Starting {} forward for config {} ({}) on {}",
            mode,
            config.id,
            config.display_name(),
            bind_addr
        );

        match mode.protocol() {
            Protocol::Tcp => {
                let listener = TcpListener::bind(bind_addr).await.map_err(bind_error)?;
                let local_addr = listener.local_addr()?;
                let (endpoint, proxy) = open_upstream(&ctx, &config, mode).await?;

                let session = Arc::new(Self::new(
                    config, mode, instance, local_addr, endpoint, proxy, ctx,
                ));
                session.spawn(Transport::Tcp(listener));
                Ok(session)
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(bind_addr).await.map_err(bind_error)?;
                let local_addr = socket.local_addr()?;
                Self::start_udp(config, mode, socket, local_addr, instance, ctx).await
            }
        }
    }

    async fn start_udp(
        config: Configuration,
        mode: ForwardMode,
        socket: UdpSocket,
        local_addr: SocketAddr,
        instance: u64,
        ctx: SessionContext,
    ) -> Result<Arc<Self>, ForwardError> {
        let ForwardMode::Proxy(target) = mode else {
            return Err(ForwardError::UnsupportedWorkload {
                workload_type: config.workload_type.clone(),
                protocol: config.protocol.clone(),
            });
        };

        let deployment = ctx.cluster.deploy_proxy(&config, target).await?;
        let session = Arc::new(Self::new(
            config,
            mode,
            instance,
            local_addr,
            deployment.endpoint,
            Some(deployment.resource),
            ctx,
        ));
        session.spawn(Transport::Udp(socket, deployment.stream));
        Ok(session)
    }

    fn new(
        config: Configuration,
        mode: ForwardMode,
        instance: u64,
        local_addr: SocketAddr,
        endpoint: Endpoint,
        proxy: Option<ProxyResource>,
        ctx: SessionContext,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Starting);
        Self {
            config,
            mode,
            instance,
            local_addr,
            started_at: current_time_millis(),
            ctx,
            state,
            last_error: Mutex::new(None),
            suspect: AtomicBool::new(false),
            retry: Notify::new(),
            reconnects: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            endpoint: Mutex::new(endpoint),
            proxy: Mutex::new(proxy),
            task: Mutex::new(None),
        }
    }

    fn spawn(self: &Arc<Self>, transport: Transport) {
        self.set_state(SessionState::Active);
        tracing::info!(
            "Config {} forwarding {} -> {}",
            self.config.id,
            self.local_addr,
            self.endpoint()
        );

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match transport {
                Transport::Tcp(listener) => session.run_tcp(listener).await,
                Transport::Udp(socket, stream) => session.run_udp(socket, stream).await,
            }
        });
        *lock(&self.task) = Some(handle);
    }

    pub fn config_id(&self) -> ConfigId {
        self.config.id
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Address the local socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn last_error(&self) -> Option<ForwardError> {
        lock(&self.last_error).clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Proxy resource currently owned by the session
    pub fn proxy(&self) -> Option<ProxyResource> {
        lock(&self.proxy).clone()
    }

    fn endpoint(&self) -> Endpoint {
        lock(&self.endpoint).clone()
    }

    /// Flag an `Active` session whose upstream may be dead after a network loss
    pub fn mark_suspect(&self) {
        if self.state() == SessionState::Active {
            self.suspect.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_suspect(&self) -> bool {
        self.suspect.load(Ordering::Relaxed)
    }

    /// Skip the remaining backoff delay and retry now
    pub fn retry_now(&self) {
        self.suspect.store(false, Ordering::Relaxed);
        if self.state() == SessionState::Reconnecting {
            self.retry.notify_one();
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            config_id: self.config.id,
            name: self.config.display_name().to_string(),
            state: self.state(),
            mode: self.mode.to_string(),
            protocol: self.mode.protocol().to_string(),
            local_address: self.local_addr.to_string(),
            started_at: self.started_at,
            reconnects: self.reconnects(),
            last_error: self.last_error().map(|e| e.to_string()),
            proxy_pod: self.proxy().map(|p| p.name),
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Config {} session {} -> {}", self.config.id, previous, state);
            let _ = self.ctx.events.send(IpcEvent::SessionStateChanged {
                config_id: self.config.id,
                state,
            });
        }
    }

    fn set_error(&self, err: ForwardError) {
        *lock(&self.last_error) = Some(err);
    }

    /// Tear the session down and release its proxy resource
    ///
    /// Returns the cleanup problem, if any, as a non-fatal warning.
    pub async fn stop(&self) -> Option<ForwardError> {
        self.set_state(SessionState::Stopping);
        self.cancel.cancel();

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("Relay task for config {} panicked", self.config.id);
                }
            }
        }

        let warning = self.release_proxy().await;
        self.set_state(SessionState::Stopped);
        tracing::info!("Stopped forward for config {}", self.config.id);
        warning
    }

    /// Delete the proxy resource, bounded by the cleanup timeout
    async fn release_proxy(&self) -> Option<ForwardError> {
        let resource = lock(&self.proxy).take()?;
        let timeout = self.ctx.settings.cleanup_timeout;

        match tokio::time::timeout(timeout, self.ctx.cluster.teardown_proxy(&resource)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                tracing::warn!(
                    "Cleanup of {}/{} for config {} failed: {}",
                    resource.namespace,
                    resource.name,
                    self.config.id,
                    e
                );
                Some(ForwardError::ResourceCleanupIncomplete(format!(
                    "{} {}/{}: {}",
                    resource.kind, resource.namespace, resource.name, e
                )))
            }
            Err(_) => {
                tracing::warn!(
                    "Cleanup of {}/{} for config {} timed out after {:?}",
                    resource.namespace,
                    resource.name,
                    self.config.id,
                    timeout
                );
                Some(ForwardError::ResourceCleanupIncomplete(format!(
                    "{} {}/{}: timed out after {:?}",
                    resource.kind, resource.namespace, resource.name, timeout
                )))
            }
        }
    }

    /// Retry budget spent: clean up and leave the registry
    async fn fail(&self, err: ForwardError) {
        tracing::error!(
            "Forward for config {} failed after {} attempts: {}",
            self.config.id,
            self.ctx.settings.reconnect.max_attempts,
            err
        );
        self.set_error(err);
        self.set_state(SessionState::Failed);

        if let Some(warning) = self.release_proxy().await {
            tracing::warn!("{}", warning);
        }

        let removed = self
            .ctx
            .registry
            .upgrade()
            .and_then(|registry| registry.remove_if_instance(self.config.id, self.instance));
        if removed.is_some() {
            let _ = self.ctx.events.send(IpcEvent::ConfigStateChanged {
                config_id: self.config.id,
                is_running: false,
            });
        }
    }

    async fn run_tcp(self: Arc<Self>, listener: TcpListener) {
        let (broken_tx, mut broken_rx) = mpsc::channel::<ForwardError>(16);
        let mut generation = self.cancel.child_token();
        let mut reconnecting: Option<JoinHandle<Outcome>> = None;
        // Clients accepted while the upstream is down, served once it is back
        let mut held: Vec<(TcpStream, SocketAddr)> = Vec::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(err) = broken_rx.recv(), if reconnecting.is_none() => {
                    generation.cancel();
                    reconnecting = Some(tokio::spawn(Arc::clone(&self).reconnect(err)));
                }

                outcome = join_reconnect(&mut reconnecting) => {
                    reconnecting = None;
                    match outcome {
                        Outcome::Restored(_) => {
                            while broken_rx.try_recv().is_ok() {}
                            generation = self.cancel.child_token();
                            for (socket, peer) in held.drain(..) {
                                tokio::spawn(Arc::clone(&self).relay_tcp(
                                    socket,
                                    peer,
                                    generation.clone(),
                                    broken_tx.clone(),
                                ));
                            }
                        }
                        Outcome::Cancelled => break,
                        Outcome::Exhausted(err) => {
                            self.fail(err).await;
                            break;
                        }
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) if reconnecting.is_some() => {
                        tracing::debug!(
                            "Holding client {} on config {} until the upstream is back",
                            peer,
                            self.config.id
                        );
                        held.push((socket, peer));
                    }
                    Ok((socket, peer)) => {
                        tokio::spawn(Arc::clone(&self).relay_tcp(
                            socket,
                            peer,
                            generation.clone(),
                            broken_tx.clone(),
                        ));
                    }
                    Err(e) => tracing::warn!("Accept on {} failed: {}", self.local_addr, e),
                },
            }
        }

        generation.cancel();
        if let Some(task) = reconnecting {
            // Bounded by the connect and proxy ready timeouts
            let _ = task.await;
        }
    }

    /// Relay one accepted client over its own upstream stream
    async fn relay_tcp(
        self: Arc<Self>,
        mut client: TcpStream,
        peer: SocketAddr,
        generation: CancellationToken,
        broken: mpsc::Sender<ForwardError>,
    ) {
        let endpoint = self.endpoint();
        let opened = tokio::time::timeout(
            self.ctx.settings.connect_timeout,
            self.ctx.cluster.open_stream(&endpoint),
        )
        .await
        .map_err(ForwardError::from)
        .and_then(|result| result);

        let mut upstream = match opened {
            Ok(stream) => Watched::new(stream),
            Err(e) => {
                tracing::debug!("Client {} on config {}: {}", peer, self.config.id, e);
                let _ = broken.try_send(e);
                return;
            }
        };

        tokio::select! {
            _ = generation.cancelled() => {
                tracing::debug!("Closing client {} on config {}", peer, self.config.id);
            }
            result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match result {
                Ok((sent, received)) => tracing::debug!(
                    "Client {} on config {} closed ({} bytes out, {} bytes in)",
                    peer,
                    self.config.id,
                    sent,
                    received
                ),
                Err(e) => match upstream.take_error() {
                    Some(cause) => {
                        let _ = broken.try_send(ForwardError::ConnectionRefused(format!(
                            "upstream {}: {}",
                            endpoint, cause
                        )));
                    }
                    None => tracing::debug!("Client {} on config {}: {}", peer, self.config.id, e),
                },
            },
        }
    }

    async fn run_udp(self: Arc<Self>, socket: UdpSocket, stream: BoxedStream) {
        let mut framed = Framed::new(stream, UdpFrameCodec::new());
        let mut buf = vec![0u8; MAX_PAYLOAD_SIZE];
        let mut peer: Option<SocketAddr> = None;

        loop {
            let broken: Option<ForwardError> = tokio::select! {
                _ = self.cancel.cancelled() => break,

                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        peer = Some(from);
                        let datagram = Bytes::copy_from_slice(&buf[..len]);
                        framed
                            .send(datagram)
                            .await
                            .err()
                            .map(|e| ForwardError::Io(format!("upstream write: {}", e)))
                    }
                    Err(e) => {
                        tracing::debug!("UDP receive on {} failed: {}", self.local_addr, e);
                        None
                    }
                },

                frame = framed.next() => match frame {
                    Some(Ok(payload)) => {
                        match peer {
                            Some(peer) => {
                                if let Err(e) = socket.send_to(&payload, peer).await {
                                    tracing::debug!("UDP reply to {} failed: {}", peer, e);
                                }
                            }
                            None => tracing::debug!(
                                "Dropping {} byte reply with no peer on config {}",
                                payload.len(),
                                self.config.id
                            ),
                        }
                        None
                    }
                    Some(Err(e)) => Some(ForwardError::Io(format!("upstream read: {}", e))),
                    None => Some(ForwardError::ConnectionRefused(format!(
                        "upstream {} closed",
                        self.endpoint()
                    ))),
                },
            };

            let Some(err) = broken else { continue };
            match Arc::clone(&self).reconnect(err).await {
                Outcome::Restored(stream) => framed = Framed::new(stream, UdpFrameCodec::new()),
                Outcome::Cancelled => break,
                Outcome::Exhausted(err) => {
                    self.fail(err).await;
                    break;
                }
            }
        }
    }

    /// Re-open the upstream with backoff until restored, cancelled or out of budget
    async fn reconnect(self: Arc<Self>, cause: ForwardError) -> Outcome {
        tracing::warn!("Upstream for config {} broke: {}", self.config.id, cause);
        self.set_error(cause);

        if !self.is_online() {
            self.suspect.store(true, Ordering::Relaxed);
            tracing::info!(
                "Network is down, config {} waits for connectivity",
                self.config.id
            );
        }
        if !self.wait_online().await {
            return Outcome::Cancelled;
        }

        self.set_state(SessionState::Reconnecting);
        let mut backoff = ExponentialBackoff::from_config(&self.ctx.settings.reconnect);

        loop {
            if !self.wait_online().await {
                return Outcome::Cancelled;
            }

            // Runs to completion so a redeployed pod always lands in `self.proxy`
            let attempt = self.reestablish().await;
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            match attempt {
                Ok(stream) => {
                    self.suspect.store(false, Ordering::Relaxed);
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.set_state(SessionState::Active);
                    tracing::info!(
                        "Config {} reconnected to {} after {} failed attempts",
                        self.config.id,
                        self.endpoint(),
                        backoff.attempts()
                    );
                    return Outcome::Restored(stream);
                }
                Err(err) => {
                    tracing::warn!(
                        "Reconnect attempt {} for config {} failed: {}",
                        backoff.attempts() + 1,
                        self.config.id,
                        err
                    );
                    self.set_error(err.clone());

                    let delay = match backoff.next_delay() {
                        Some(delay) if !backoff.is_exhausted() => delay,
                        _ => return Outcome::Exhausted(err),
                    };
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Outcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.retry.notified() => {
                            tracing::debug!("Config {} retrying early", self.config.id);
                        }
                    }
                }
            }
        }
    }

    /// Open a fresh upstream; proxy pods that vanished are redeployed
    async fn reestablish(&self) -> Result<BoxedStream, ForwardError> {
        let timeout = self.ctx.settings.connect_timeout;

        match self.mode {
            ForwardMode::Direct(_) => {
                let (endpoint, stream) =
                    tokio::time::timeout(timeout, self.ctx.cluster.open_direct_forward(&self.config))
                        .await??;
                *lock(&self.endpoint) = endpoint;
                Ok(stream)
            }
            ForwardMode::Proxy(target) => {
                let endpoint = self.endpoint();
                match tokio::time::timeout(timeout, self.ctx.cluster.open_stream(&endpoint)).await? {
                    Ok(stream) => Ok(stream),
                    Err(ForwardError::TargetNotFound(reason)) => {
                        tracing::info!(
                            "Proxy pod for config {} is gone ({}), redeploying",
                            self.config.id,
                            reason
                        );
                        if let Some(warning) = self.release_proxy().await {
                            tracing::warn!("{}", warning);
                        }
                        let deployment = self.ctx.cluster.deploy_proxy(&self.config, target).await?;
                        *lock(&self.endpoint) = deployment.endpoint;
                        *lock(&self.proxy) = Some(deployment.resource);
                        Ok(deployment.stream)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn is_online(&self) -> bool {
        *self.ctx.connectivity.borrow()
    }

    /// Park until the monitor reports connectivity; `false` if cancelled
    async fn wait_online(&self) -> bool {
        let mut connectivity = self.ctx.connectivity.clone();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            seen = async { connectivity.wait_for(|online| *online).await.is_ok() } => {
                if !seen {
                    tracing::debug!("Connectivity channel closed, assuming online");
                }
                true
            }
        }
    }
}

/// Resolve and open the first upstream for a TCP session
///
/// The stream itself only proves reachability; each client opens its own.
async fn open_upstream(
    ctx: &SessionContext,
    config: &Configuration,
    mode: ForwardMode,
) -> Result<(Endpoint, Option<ProxyResource>), ForwardError> {
    match mode {
        ForwardMode::Direct(_) => {
            let (endpoint, _probe) = tokio::time::timeout(
                ctx.settings.connect_timeout,
                ctx.cluster.open_direct_forward(config),
            )
            .await??;
            Ok((endpoint, None))
        }
        ForwardMode::Proxy(target) => {
            let deployment = ctx.cluster.deploy_proxy(config, target).await?;
            Ok((deployment.endpoint, Some(deployment.resource)))
        }
    }
}

/// Await the running reconnect task, or never if there is none
async fn join_reconnect(task: &mut Option<JoinHandle<Outcome>>) -> Outcome {
    match task {
        Some(handle) => match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Exhausted(ForwardError::Io(format!("reconnect task: {}", e))),
        },
        None => std::future::pending().await,
    }
}
