//! Resource audit commands

use anyhow::Result;

use crate::ipc::OrchestratorClient;
use crate::output::{format_resources, print_info, print_success, print_warning};

/// List kftray resources in a context
pub async fn resources_list(
    client: &mut OrchestratorClient,
    context: Option<String>,
    kubeconfig: Option<String>,
    orphaned_only: bool,
) -> Result<()> {
    let mut namespaces = client.list_resources(context, kubeconfig).await?;
    if orphaned_only {
        for ns in &mut namespaces {
            ns.resources.retain(|r| r.is_orphaned);
        }
    }

    println!("{}", format_resources(&namespaces));

    let orphans = namespaces
        .iter()
        .flat_map(|ns| &ns.resources)
        .filter(|r| r.is_orphaned)
        .count();
    if orphans > 0 {
        print_info(&format!(
            "{} orphaned resource(s); remove them with: kftray resources cleanup",
            orphans
        ));
    }
    Ok(())
}

/// Delete one resource
pub async fn resources_delete(
    client: &mut OrchestratorClient,
    context: Option<String>,
    kubeconfig: Option<String>,
    namespace: String,
    resource_type: String,
    name: String,
) -> Result<()> {
    client
        .delete_resource(context, kubeconfig, namespace.clone(), resource_type.clone(), name.clone())
        .await?;
    print_success(&format!("Deleted {} {}/{}", resource_type, namespace, name));
    Ok(())
}

/// Delete every orphaned resource
pub async fn resources_cleanup(
    client: &mut OrchestratorClient,
    context: Option<String>,
    kubeconfig: Option<String>,
) -> Result<()> {
    let message = client.cleanup_resources(context, kubeconfig).await?;
    if message.contains("errors") {
        print_warning(&message);
    } else {
        print_success(&message);
    }
    Ok(())
}
