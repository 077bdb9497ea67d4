//! Cluster discovery commands

use anyhow::Result;

use crate::ipc::OrchestratorClient;
use crate::output::print_info;

/// List contexts in a kubeconfig
pub async fn contexts_command(
    client: &mut OrchestratorClient,
    kubeconfig: Option<String>,
) -> Result<()> {
    let contexts = client.list_contexts(kubeconfig).await?;
    print_names(&contexts, "No contexts found");
    Ok(())
}

/// List namespaces in a context
pub async fn namespaces_command(
    client: &mut OrchestratorClient,
    context: Option<String>,
    kubeconfig: Option<String>,
) -> Result<()> {
    let namespaces = client.list_namespaces(context, kubeconfig).await?;
    print_names(&namespaces, "No namespaces found");
    Ok(())
}

fn print_names(names: &[String], empty: &str) {
    if names.is_empty() {
        print_info(empty);
    }
    for name in names {
        println!("{}", name);
    }
}
