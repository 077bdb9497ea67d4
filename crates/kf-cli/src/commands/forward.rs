//! Start and stop commands

use anyhow::Result;

use kf_core::{ConfigId, Configuration, ForwardMode};

use crate::ipc::{CommandStatus, OrchestratorClient};
use crate::output::{print_error, print_results};

/// Whether a stored config runs through a proxy pod
fn is_proxy(config: &Configuration) -> bool {
    ForwardMode::classify(config)
        .map(|mode| mode.is_proxy())
        .unwrap_or(false)
}

/// Execute the start command
pub async fn start_command(client: &mut OrchestratorClient, ids: &[i64], all: bool) -> Result<()> {
    let mut missing = 0;
    let results: Vec<CommandStatus> = if all {
        client.start_all().await?
    } else {
        let mut direct = Vec::new();
        let mut proxied = Vec::new();

        for &id in ids {
            match client.get_config(ConfigId(id)).await {
                Ok(config) if is_proxy(&config) => proxied.push(config),
                Ok(config) => direct.push(config),
                Err(e) => {
                    print_error(&format!("Config {}: {}", id, e));
                    missing += 1;
                }
            }
        }

        let mut results = Vec::new();
        if !direct.is_empty() {
            results.extend(client.start_tcp(direct).await?);
        }
        if !proxied.is_empty() {
            results.extend(client.deploy_and_forward(proxied).await?);
        }
        results
    };

    let failed = print_results(&results) + missing;
    if failed > 0 {
        anyhow::bail!("Failed to start {} config(s)", failed);
    }
    Ok(())
}

/// Execute the stop command
pub async fn stop_command(client: &mut OrchestratorClient, ids: &[i64], all: bool) -> Result<()> {
    let results = if all {
        client.stop_all().await?
    } else {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let id = ConfigId(id);
            // Proxy forwards also sweep leftover pods; a config deleted while
            // running falls back to a plain stop
            let status = match client.get_config(id).await {
                Ok(config) if is_proxy(&config) => client.stop_proxy(&config).await?,
                _ => client.stop(id).await?,
            };
            results.push(status);
        }
        results
    };

    let failed = print_results(&results);
    if failed > 0 {
        anyhow::bail!("Failed to stop {} config(s)", failed);
    }
    Ok(())
}
