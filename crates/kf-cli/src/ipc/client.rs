//! IPC client for communicating with the orchestrator
//!
//! Uses TCP on localhost for cross-platform compatibility. One JSON
//! request per line; the CLI never subscribes to events, so every line
//! read back is the response to the last request.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use kf_core::ipc::{
    default_ipc_address, CommandStatus, ConfigState, IpcRequest, IpcResponse, NamespaceResources,
    OrchestratorStatus, SessionInfo,
};
use kf_core::{ConfigId, Configuration};

/// Client for communicating with the orchestrator daemon
pub struct OrchestratorClient {
    address: String,
    stream: Option<BufReader<TcpStream>>,
}

/// Turn an error response into an `anyhow` error, keeping the kind visible
fn response_error(response: IpcResponse) -> anyhow::Error {
    match response {
        IpcResponse::Error {
            message,
            kind: Some(kind),
        } => anyhow::anyhow!("{} ({})", message, kind),
        IpcResponse::Error { message, kind: None } => anyhow::anyhow!("{}", message),
        other => anyhow::anyhow!("Unexpected response: {:?}", other),
    }
}

impl OrchestratorClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            stream: None,
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the orchestrator
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to orchestrator at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to orchestrator at {}. Is it running?",
                self.address
            )
        })?;

        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    /// Check if the orchestrator is running
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Get orchestrator status
    pub async fn status(&mut self) -> Result<OrchestratorStatus> {
        match self.send_request(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            other => Err(response_error(other)),
        }
    }

    /// Start direct TCP forwards
    pub async fn start_tcp(&mut self, configs: Vec<Configuration>) -> Result<Vec<CommandStatus>> {
        self.results(IpcRequest::StartPortForwardTcp { configs }).await
    }

    /// Start proxy-pod forwards
    pub async fn deploy_and_forward(
        &mut self,
        configs: Vec<Configuration>,
    ) -> Result<Vec<CommandStatus>> {
        self.results(IpcRequest::DeployAndForwardPod { configs }).await
    }

    /// Start every stored configuration
    pub async fn start_all(&mut self) -> Result<Vec<CommandStatus>> {
        self.results(IpcRequest::StartAll).await
    }

    /// Stop one forward
    pub async fn stop(&mut self, config_id: ConfigId) -> Result<CommandStatus> {
        match self
            .send_request(IpcRequest::StopPortForward { config_id })
            .await?
        {
            IpcResponse::Result(status) => Ok(status),
            other => Err(response_error(other)),
        }
    }

    /// Stop a proxy forward and sweep its leftover pods
    pub async fn stop_proxy(&mut self, config: &Configuration) -> Result<CommandStatus> {
        let request = IpcRequest::StopProxyForward {
            config_id: config.id,
            namespace: config.namespace.clone(),
            service_name: config.target.clone(),
            local_port: config.local_port,
            remote_address: config.remote_address.clone(),
            protocol: config.protocol.clone(),
        };
        match self.send_request(request).await? {
            IpcResponse::Result(status) => Ok(status),
            other => Err(response_error(other)),
        }
    }

    /// Stop every running forward
    pub async fn stop_all(&mut self) -> Result<Vec<CommandStatus>> {
        self.results(IpcRequest::StopAllPortForward).await
    }

    /// Running flag for every stored configuration
    pub async fn config_states(&mut self) -> Result<Vec<ConfigState>> {
        match self.send_request(IpcRequest::GetConfigStates).await? {
            IpcResponse::ConfigStates { states } => Ok(states),
            other => Err(response_error(other)),
        }
    }

    /// List registered sessions
    pub async fn list_sessions(&mut self) -> Result<Vec<SessionInfo>> {
        match self.send_request(IpcRequest::ListSessions).await? {
            IpcResponse::Sessions { sessions } => Ok(sessions),
            other => Err(response_error(other)),
        }
    }

    /// Proxy resources in a context, grouped by namespace
    pub async fn list_resources(
        &mut self,
        context: Option<String>,
        kubeconfig: Option<String>,
    ) -> Result<Vec<NamespaceResources>> {
        let request = IpcRequest::ListAllKftrayResources {
            context,
            kubeconfig,
        };
        match self.send_request(request).await? {
            IpcResponse::Resources { namespaces } => Ok(namespaces),
            other => Err(response_error(other)),
        }
    }

    /// Delete one proxy resource
    pub async fn delete_resource(
        &mut self,
        context: Option<String>,
        kubeconfig: Option<String>,
        namespace: String,
        resource_type: String,
        resource_name: String,
    ) -> Result<()> {
        let request = IpcRequest::DeleteKftrayResource {
            context,
            namespace,
            resource_type,
            resource_name,
            config_id: None,
            kubeconfig,
        };
        match self.send_request(request).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(response_error(other)),
        }
    }

    /// Delete every orphaned resource; returns the server's summary
    pub async fn cleanup_resources(
        &mut self,
        context: Option<String>,
        kubeconfig: Option<String>,
    ) -> Result<String> {
        let request = IpcRequest::CleanupAllKftrayResources {
            context,
            kubeconfig,
        };
        self.message(request).await
    }

    /// Contexts in a kubeconfig
    pub async fn list_contexts(&mut self, kubeconfig: Option<String>) -> Result<Vec<String>> {
        self.names(IpcRequest::ListContexts { kubeconfig }).await
    }

    /// Namespaces in a context
    pub async fn list_namespaces(
        &mut self,
        context: Option<String>,
        kubeconfig: Option<String>,
    ) -> Result<Vec<String>> {
        self.names(IpcRequest::ListNamespaces {
            context,
            kubeconfig,
        })
        .await
    }

    /// All stored configurations
    pub async fn list_configs(&mut self) -> Result<Vec<Configuration>> {
        match self.send_request(IpcRequest::ListConfigs).await? {
            IpcResponse::Configs { configs } => Ok(configs),
            other => Err(response_error(other)),
        }
    }

    /// One stored configuration
    pub async fn get_config(&mut self, config_id: ConfigId) -> Result<Configuration> {
        match self.send_request(IpcRequest::GetConfig { config_id }).await? {
            IpcResponse::Config { config } => Ok(config),
            other => Err(response_error(other)),
        }
    }

    /// Delete a stored configuration
    pub async fn delete_config(&mut self, config_id: ConfigId) -> Result<()> {
        match self
            .send_request(IpcRequest::DeleteConfig { config_id })
            .await?
        {
            IpcResponse::Ok => Ok(()),
            other => Err(response_error(other)),
        }
    }

    /// Import configurations from a JSON array
    pub async fn import_configs(&mut self, json: String) -> Result<String> {
        self.message(IpcRequest::ImportConfigs { json }).await
    }

    /// Export all configurations as JSON
    pub async fn export_configs(&mut self) -> Result<String> {
        match self.send_request(IpcRequest::ExportConfigs).await? {
            IpcResponse::Exported { json } => Ok(json),
            other => Err(response_error(other)),
        }
    }

    /// Shutdown the orchestrator
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.send_request(IpcRequest::Shutdown).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(response_error(other)),
        }
    }

    async fn results(&mut self, request: IpcRequest) -> Result<Vec<CommandStatus>> {
        match self.send_request(request).await? {
            IpcResponse::Results { results } => Ok(results),
            other => Err(response_error(other)),
        }
    }

    async fn names(&mut self, request: IpcRequest) -> Result<Vec<String>> {
        match self.send_request(request).await? {
            IpcResponse::Names { names } => Ok(names),
            other => Err(response_error(other)),
        }
    }

    async fn message(&mut self, request: IpcRequest) -> Result<String> {
        match self.send_request(request).await? {
            IpcResponse::Message { message } => Ok(message),
            other => Err(response_error(other)),
        }
    }

    /// Send a request and receive response (used by all public methods)
    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        // Send request as JSON line
        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        stream.get_mut().write_all(request_json.as_bytes()).await?;

        // Read response line
        let mut response_line = String::new();
        let read = stream.read_line(&mut response_line).await?;
        if read == 0 {
            self.stream = None;
            anyhow::bail!("Orchestrator closed the connection");
        }

        let response: IpcResponse = serde_json::from_str(&response_line)
            .with_context(|| format!("Malformed response: {}", response_line.trim()))?;
        Ok(response)
    }
}

impl Default for OrchestratorClient {
    fn default() -> Self {
        Self::new()
    }
}
