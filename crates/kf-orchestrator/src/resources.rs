//! Resource tracker: audit and clean up proxy objects in the cluster
//!
//! Orphan status is computed at read time by cross-referencing the session
//! registry and the config store, so the view is eventually consistent and
//! never blocks the forwarding hot path.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;

use kf_core::ipc::{NamespaceResources, ResourceInfo};
use kf_core::{ClusterRef, ConfigId, ForwardError, ProxyResource};

use crate::orchestrator::Orchestrator;

/// Resources of one namespace, sorted by name
#[derive(Debug, Clone)]
pub struct NamespaceGroup {
    pub namespace: String,
    pub resources: Vec<ProxyResource>,
}

/// Outcome of a bulk orphan cleanup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn message(&self) -> String {
        if self.errors.is_empty() {
            format!("Successfully deleted {} resources", self.deleted)
        } else {
            format!(
                "Deleted {} resources with {} errors",
                self.deleted,
                self.errors.len()
            )
        }
    }
}

pub struct ResourceTracker {
    orchestrator: Arc<Orchestrator>,
}

impl ResourceTracker {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Proxy resources grouped by namespace, with the orphaned flag set
    pub async fn list(
        &self,
        cluster: &ClusterRef,
        namespace: Option<&str>,
    ) -> Result<Vec<NamespaceGroup>, ForwardError> {
        let mut resources = self
            .orchestrator
            .cluster()
            .list_resources(cluster, namespace)
            .await?;

        let known: HashSet<ConfigId> = self
            .orchestrator
            .store()
            .list()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        for resource in &mut resources {
            resource.orphaned = self.is_orphaned(resource, &known);
        }

        let mut groups: BTreeMap<String, Vec<ProxyResource>> = BTreeMap::new();
        for resource in resources {
            groups
                .entry(resource.namespace.clone())
                .or_default()
                .push(resource);
        }

        Ok(groups
            .into_iter()
            .map(|(namespace, mut resources)| {
                resources.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
                NamespaceGroup {
                    namespace,
                    resources,
                }
            })
            .collect())
    }

    /// No live session owns it; unlabelled or deleted configs always count.
    /// A config with a start or stop in flight is treated as owned.
    fn is_orphaned(&self, resource: &ProxyResource, known: &HashSet<ConfigId>) -> bool {
        let registry = self.orchestrator.registry();
        match resource.config_id {
            None => true,
            Some(id) if !known.contains(&id) => true,
            Some(id) => !(registry.is_running(id) || registry.is_busy(id)),
        }
    }

    /// Delete one resource, stopping the session that owns it first
    pub async fn delete(&self, resource: &ProxyResource) -> Result<(), ForwardError> {
        if let Some(id) = resource.config_id {
            if self.orchestrator.registry().contains(id) {
                tracing::info!(
                    "Stopping config {} before deleting {} {}/{}",
                    id,
                    resource.kind,
                    resource.namespace,
                    resource.name
                );
                let status = self.orchestrator.stop_one(id).await;
                if let Some(warning) = status.warning {
                    tracing::debug!("Stop of config {}: {}", id, warning);
                }
            }
        }

        self.orchestrator.cluster().delete_resource(resource).await?;
        tracing::info!(
            "Deleted {} {}/{}",
            resource.kind,
            resource.namespace,
            resource.name
        );
        Ok(())
    }

    /// Delete every orphaned resource in a context
    pub async fn cleanup_all(&self, cluster: &ClusterRef) -> Result<CleanupReport, ForwardError> {
        let orphans: Vec<ProxyResource> = self
            .list(cluster, None)
            .await?
            .into_iter()
            .flat_map(|group| group.resources)
            .filter(|r| r.orphaned)
            .collect();

        let cluster_client = self.orchestrator.cluster();
        let results = join_all(orphans.iter().map(|r| cluster_client.delete_resource(r))).await;

        let mut report = CleanupReport::default();
        for (resource, result) in orphans.iter().zip(results) {
            match result {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to delete {} {}/{}: {}",
                        resource.kind,
                        resource.namespace,
                        resource.name,
                        e
                    );
                    report
                        .errors
                        .push(format!("{}/{}: {}", resource.namespace, resource.name, e));
                }
            }
        }

        tracing::info!("Cleanup in context {}: {}", cluster, report.message());
        Ok(report)
    }
}

impl From<NamespaceGroup> for NamespaceResources {
    fn from(group: NamespaceGroup) -> Self {
        NamespaceResources {
            namespace: group.namespace,
            resources: group.resources.into_iter().map(ResourceInfo::from).collect(),
        }
    }
}
