//! Backup pipeline.

use super::database;
use crate::catalog::{self, ObjectCatalog};
use crate::context::{BackupContext, RuntimeState, SyncTarget};
use crate::fs::archive;
use crate::fs::walker::WalkOptions;
use crate::gateway::{remote, Gateway};
use crate::utils::{AccordError, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default)]
pub struct BackupReport {
    /// Files written into the backup directory, in the order produced
    pub files: Vec<PathBuf>,
    pub exported_objects: usize,
    pub archive: Option<PathBuf>,
    pub synced: bool,
}

pub async fn run<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<BackupReport> {
    let mut runtime = RuntimeState::default();
    let mut report = BackupReport::default();

    if context.repos_only {
        info!("Backing up repository database");
        report.files.push(database::dump_repository(context, gateway, &mut runtime).await?);
    } else {
        info!("Backing up postgres database");
        report.files.push(database::dump_all(context, gateway, &mut runtime).await?);

        info!("Snapshotting cluster state");
        report.files.push(snapshot_cluster_state(context, gateway).await?);

        info!("Archiving platform storage");
        report.files.push(archive_storage(context).await?);

        info!("Exporting secrets and config maps");
        let exported = export_objects(context, gateway).await?;
        report.exported_objects = exported.len();

        info!("Sanitizing {} exported objects", exported.len());
        for path in &exported {
            catalog::sanitize_file(path)?;
        }
    }

    context.signal.raise()?;

    if context.create_archive {
        report.archive = Some(consolidate(context).await?);
    }

    if let Some(target) = &context.sync {
        info!("Syncing repositories to {}", target.node);
        sync_repositories(context, gateway, target).await?;
        info!("Syncing backup directory to {}", target.node);
        sync_backup_directory(context, gateway, target).await?;
        report.synced = true;
    }

    info!(files = report.files.len(), objects = report.exported_objects, "Backup complete");
    Ok(report)
}

async fn snapshot_cluster_state<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<PathBuf> {
    let destination = context.backup_file(&context.platform.files.cluster_state);
    gateway.snapshot_cluster_state(&destination).await?;
    if !destination.is_file() {
        return Err(AccordError::BackupMissing(destination));
    }
    Ok(destination)
}

/// Archive the storage directory without the live database and the
/// repository object store.
async fn archive_storage(context: &BackupContext) -> Result<PathBuf> {
    let platform = &context.platform;
    let excluded = [&platform.paths.pgdata_dir, &platform.paths.repository_dir]
        .into_iter()
        .filter_map(|p| platform.storage_relative(p));
    let destination = context.backup_file(&platform.files.storage_archive);

    archive::create_blocking(
        platform.storage_path(),
        platform.paths.storage_dir.clone(),
        destination.clone(),
        WalkOptions::excluding(excluded),
    )
    .await?;

    if !destination.is_file() {
        return Err(AccordError::BackupMissing(destination));
    }
    Ok(destination)
}

async fn export_objects<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<Vec<PathBuf>> {
    let cluster = &context.platform.cluster;
    let directory = context.secrets_directory();

    let mut secrets = ObjectCatalog::platform_secrets();
    secrets
        .discover(gateway, &cluster.namespace, &cluster.credential_secret_marker)
        .await?;

    let mut exported = secrets.export(gateway, &directory).await?;
    exported.extend(ObjectCatalog::platform_config_maps().export(gateway, &directory).await?);
    Ok(exported)
}

/// Pack the whole backup directory into one archive inside it.
async fn consolidate(context: &BackupContext) -> Result<PathBuf> {
    let prefix = if context.repos_only { "repos_db_backup" } else { "ae5_backup" };
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M");
    let destination = context.backup_file(&format!("{prefix}_{stamp}.tar.gz"));

    let arc_root = context
        .backup_directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AccordError::Config(format!(
                "backup directory {} has no name to archive under",
                context.backup_directory.display()
            ))
        })?;

    archive::create_blocking(
        context.backup_directory.clone(),
        arc_root,
        destination.clone(),
        WalkOptions::default(),
    )
    .await?;
    let entries = archive::verify(&destination)?;
    info!("Consolidated archive {} ({} entries)", destination.display(), entries);
    Ok(destination)
}

/// Mirror the repository object store. The remote copy is handed to the
/// sync user for the transfer and back to root afterwards.
async fn sync_repositories<G: Gateway>(context: &BackupContext, gateway: &G, target: &SyncTarget) -> Result<()> {
    let repository = &context.platform.paths.repository_dir;
    let user = &target.user;

    let commands = [
        remote::ssh_sudo(user, &target.node, &format!("chown -R {user}:{user} {}", repository.display())),
        remote::rsync_mirror(repository, user, &target.node),
        remote::ssh_sudo(user, &target.node, &format!("chown -R root:root {}", repository.display())),
    ];
    for command in &commands {
        gateway.run_as_user(user, command).await?;
    }
    Ok(())
}

async fn sync_backup_directory<G: Gateway>(context: &BackupContext, gateway: &G, target: &SyncTarget) -> Result<()> {
    let user = &target.user;
    gateway
        .set_owner(&context.backup_directory, &format!("{user}:{user}"), true)
        .await?;
    gateway
        .run_as_user(user, &remote::rsync_mirror(&context.backup_directory, user, &target.node))
        .await
}
