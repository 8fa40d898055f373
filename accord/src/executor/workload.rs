//! Cluster workload steps: cleanup, scaling and restart.

use crate::context::BackupContext;
use crate::gateway::{Gateway, Lookup};
use crate::poll::{self, Poller};
use crate::utils::{AccordError, Result};
use tracing::info;

/// Delete user session and app deployments. Finding none is success.
pub async fn remove_user_workloads<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<usize> {
    let cluster = &context.platform.cluster;
    let deployments = gateway.list_deployments(&cluster.namespace).await?;
    let matching = Lookup::from_vec(
        deployments
            .into_iter()
            .filter(|name| cluster.workload_prefixes.iter().any(|p| name.starts_with(p.as_str())))
            .collect(),
    );

    match matching {
        Lookup::NoneFound => {
            info!("No sessions or deployments to clean up");
            Ok(0)
        }
        Lookup::Found(names) => {
            for name in &names {
                gateway.delete_deployment(name, &cluster.namespace).await?;
                info!(deployment = %name, "Deleted");
            }
            Ok(names.len())
        }
    }
}

/// Scale the postgres deployment to 0 or 1 replicas and wait until the
/// listing agrees: no postgres instance at all for 0, a Running one for 1.
pub async fn scale_postgres<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    poller: &Poller,
    replicas: u32,
) -> Result<u32> {
    if replicas > 1 {
        return Err(AccordError::InvalidReplicaCount(replicas));
    }

    let cluster = &context.platform.cluster;
    gateway
        .scale_deployment(&cluster.postgres_deployment, &cluster.namespace, replicas)
        .await?;

    let condition = format!("{} at {} replicas", cluster.postgres_deployment, replicas);
    let attempts = poller
        .wait_until(&condition, move || async move {
            let instances = gateway.list_instances(&cluster.namespace).await?;
            Ok(if replicas == 1 {
                poll::scaled_up(&instances, &cluster.postgres_marker)
            } else {
                poll::scaled_down(&instances, &cluster.postgres_marker)
            })
        })
        .await?;

    info!(deployment = %cluster.postgres_deployment, replicas, attempts, "Scale complete");
    Ok(attempts)
}

/// Delete every instance and wait until the platform has brought them all
/// back to Running.
pub async fn restart_all<G: Gateway>(context: &BackupContext, gateway: &G, poller: &Poller) -> Result<u32> {
    let namespace = &context.platform.cluster.namespace;
    gateway.delete_all_instances(namespace).await?;

    let attempts = poller
        .wait_until("all instances Running", move || async move {
            let instances = gateway.list_instances(namespace).await?;
            Ok(poll::all_running(&instances))
        })
        .await?;

    info!(attempts, "All instances restarted");
    Ok(attempts)
}
