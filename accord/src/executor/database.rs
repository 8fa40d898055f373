//! Steps that run inside the postgres container.
//!
//! Dumps are written by the container into its data directory, which the
//! host sees under `pgdata_dir`; restores go the other way.

use crate::context::{BackupContext, RuntimeState};
use crate::fs::{move_file, remove_if_present};
use crate::gateway::{DeploymentRecord, Gateway};
use crate::utils::{AccordError, Result};
use std::path::PathBuf;
use tracing::{info, warn};

const REPOSITORY_DATABASE: &str = "anaconda_repository";
const WORKSPACE_DATABASE: &str = "anaconda_workspace";
const DEPLOY_DATABASE: &str = "anaconda_deploy";

fn as_postgres(command: &str) -> String {
    format!("su - postgres -c '{command}'")
}

async fn current_container<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
) -> Result<String> {
    runtime.refresh(gateway, &context.platform).await?;
    Ok(runtime.container(&context.platform.cluster.postgres_marker)?.to_string())
}

/// Have the container write `file_name`, confirm the host can see it, and
/// move it into the backup directory.
async fn dump<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
    file_name: &str,
    command: String,
) -> Result<PathBuf> {
    let container = current_container(context, gateway, runtime).await?;
    let host_path = context.host_dump_path(file_name);

    // A leftover from an earlier run would satisfy the existence check.
    remove_if_present(&host_path)?;

    gateway.run_in_container(&container, &as_postgres(&command)).await?;

    if !host_path.is_file() {
        return Err(AccordError::BackupMissing(host_path));
    }

    let destination = context.backup_file(file_name);
    move_file(&host_path, &destination)?;
    info!(file = %destination.display(), "Database dump stored");
    Ok(destination)
}

/// `pg_dumpall` of every database.
pub async fn dump_all<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
) -> Result<PathBuf> {
    let file_name = &context.platform.files.postgres_dump;
    let command = format!(
        "pg_dumpall -U postgres --clean -f {}",
        context.container_dump_path(file_name).display()
    );
    dump(context, gateway, runtime, file_name, command).await
}

/// Tar-format dump of the repository database only.
pub async fn dump_repository<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
) -> Result<PathBuf> {
    let file_name = &context.platform.files.repository_dump;
    let command = format!(
        "pg_dump -U postgres -F t {REPOSITORY_DATABASE} > {}",
        context.container_dump_path(file_name).display()
    );
    dump(context, gateway, runtime, file_name, command).await
}

/// Move `file_name` from the backup directory to where the container can
/// read it and hand it to the postgres user.
async fn stage<G: Gateway>(context: &BackupContext, gateway: &G, file_name: &str) -> Result<()> {
    let host_path = context.host_dump_path(file_name);
    move_file(&context.backup_file(file_name), &host_path)?;
    gateway
        .set_owner(&host_path, &context.platform.ownership.dump_owner, false)
        .await
}

/// Load the full dump with `psql`.
pub async fn restore_all<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
) -> Result<()> {
    let container = current_container(context, gateway, runtime).await?;
    let file_name = &context.platform.files.postgres_dump;

    stage(context, gateway, file_name).await?;
    let command = format!(
        "psql -U postgres < {}",
        context.container_dump_path(file_name).display()
    );
    gateway.run_in_container(&container, &as_postgres(&command)).await?;
    info!("Postgres database restored");
    Ok(())
}

/// Load the repository dump with `pg_restore --clean`.
pub async fn restore_repository<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
) -> Result<()> {
    let container = current_container(context, gateway, runtime).await?;
    let file_name = &context.platform.files.repository_dump;

    stage(context, gateway, file_name).await?;
    let command = format!(
        "pg_restore -U postgres --clean -d {REPOSITORY_DATABASE} {}",
        context.container_dump_path(file_name).display()
    );
    gateway.run_in_container(&container, &as_postgres(&command)).await?;
    info!("Repository database restored");
    Ok(())
}

/// Clear restored sessions and deployments so nothing from the source
/// cluster appears to be running. Returns the deployments that were
/// `Started` before the purge.
pub async fn purge_sessions_and_deployments<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    runtime: &mut RuntimeState,
) -> Result<Vec<DeploymentRecord>> {
    let container = current_container(context, gateway, runtime).await?;

    let delete_sessions = format!(r#"psql -U postgres -d {WORKSPACE_DATABASE} -c "delete from sessions;""#);
    gateway.run_in_container(&container, &as_postgres(&delete_sessions)).await?;

    let select_deployments = format!(
        r#"psql -t -U postgres -d {DEPLOY_DATABASE} -c "select row_to_json(t) from (select * from deployments) t;""#
    );
    let rows = gateway
        .run_in_container(&container, &as_postgres(&select_deployments))
        .await?;
    let started = started_deployments(&rows);

    let truncate = format!(r#"psql -U postgres -d {DEPLOY_DATABASE} -c "truncate deployments cascade;""#);
    gateway.run_in_container(&container, &as_postgres(&truncate)).await?;

    info!(started = started.len(), "Sessions and deployments purged");
    Ok(started)
}

/// Parse one JSON object per line and keep the `Started` ones. A row that
/// cannot be read is logged and counted as not started, so the purge still
/// reaches the truncate.
pub fn started_deployments(rows: &[u8]) -> Vec<DeploymentRecord> {
    let text = String::from_utf8_lossy(rows);
    let mut started = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<DeploymentRecord>(line) {
            Ok(record) if record.is_started() => started.push(record),
            Ok(_) => {}
            Err(e) => warn!(row = %line, "Skipping unreadable deployment row: {}", e),
        }
    }

    started
}
