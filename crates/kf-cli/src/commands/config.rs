//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use kf_core::ConfigId;

use crate::ipc::OrchestratorClient;
use crate::output::{format_configs, print_success};

/// List stored configurations with their running flags
pub async fn config_list(client: &mut OrchestratorClient) -> Result<()> {
    let configs = client.list_configs().await?;
    let states = client.config_states().await?;
    println!("{}", format_configs(&configs, &states));
    Ok(())
}

/// Print one configuration as JSON
pub async fn config_show(client: &mut OrchestratorClient, id: i64) -> Result<()> {
    let config = client.get_config(ConfigId(id)).await?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Import configurations from a JSON file
pub async fn config_import(client: &mut OrchestratorClient, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;

    // Catch obviously bad files before they reach the daemon
    serde_json::from_str::<serde_json::Value>(&json)
        .with_context(|| format!("{:?} is not valid JSON", path))?;

    let message = client.import_configs(json).await?;
    print_success(&message);
    Ok(())
}

/// Export configurations to a file, or stdout
pub async fn config_export(client: &mut OrchestratorClient, output: Option<&Path>) -> Result<()> {
    let json = client.export_configs().await?;
    match output {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("Failed to write {:?}", path))?;
            print_success(&format!("Exported configs to {}", path.display()));
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Delete a stored configuration; a running forward is stopped first
pub async fn config_delete(client: &mut OrchestratorClient, id: i64) -> Result<()> {
    client.delete_config(ConfigId(id)).await?;
    print_success(&format!("Deleted config {}", id));
    Ok(())
}
