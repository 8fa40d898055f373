//! Restore pipeline.
//!
//! Every step runs in order and the first failure aborts the run, leaving
//! the cluster as the last completed step left it. Object replays and
//! deployment relaunches are the exceptions: each failure there is logged
//! and the rest carry on.

use super::{database, workload};
use crate::catalog::{self, RestoreSummary};
use crate::context::{BackupContext, RuntimeState};
use crate::fs::walker::WalkOptions;
use crate::fs::{archive, remove_tree_if_present};
use crate::gateway::{DeploymentRecord, Gateway};
use crate::poll::Poller;
use crate::utils::{AccordError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Deployments that were `Started` in the restored database
    pub started: Vec<DeploymentRecord>,
    pub relaunched: usize,
    pub relaunch_failures: usize,
    /// `None` when the object replay was skipped
    pub objects: Option<RestoreSummary>,
    pub snapshot: Option<PathBuf>,
}

pub async fn run<G: Gateway>(context: &BackupContext, gateway: &G, poller: &Poller) -> Result<RestoreReport> {
    if let Some(path) = &context.restore_archive {
        unpack_consolidated(context, path).await?;
    }

    let mut runtime = RuntimeState::default();
    let report = if context.repos_only {
        info!("Restoring repository database");
        database::restore_repository(context, gateway, &mut runtime).await?;
        RestoreReport::default()
    } else {
        restore_platform(context, gateway, poller, &mut runtime).await?
    };

    context.signal.clear()?;
    info!("Restore complete");
    Ok(report)
}

async fn restore_platform<G: Gateway>(
    context: &BackupContext,
    gateway: &G,
    poller: &Poller,
    runtime: &mut RuntimeState,
) -> Result<RestoreReport> {
    let mut report = RestoreReport::default();

    info!("Cleaning up sessions and deployments");
    workload::remove_user_workloads(context, gateway).await?;

    info!("Scaling down postgres for restore");
    workload::scale_postgres(context, gateway, poller, 0).await?;

    info!("Replacing platform storage");
    report.snapshot = Some(replace_storage(context, gateway).await?);

    info!("Scaling up postgres");
    workload::scale_postgres(context, gateway, poller, 1).await?;

    info!("Restoring postgres database");
    database::restore_all(context, gateway, runtime).await?;

    info!("Purging restored sessions and deployments");
    report.started = database::purge_sessions_and_deployments(context, gateway, runtime).await?;

    if context.skip_config_restore {
        info!("Skipping secret and config map restore");
    } else {
        info!("Restoring secrets and config maps");
        report.objects = Some(catalog::restore_objects(gateway, &context.secrets_directory()).await?);
    }

    info!("Restarting all instances");
    workload::restart_all(context, gateway, poller).await?;

    if context.start_deployments {
        info!("Relaunching {} deployments", report.started.len());
        for record in &report.started {
            match gateway.relaunch_deployment(record).await {
                Ok(()) => report.relaunched += 1,
                Err(e) => {
                    warn!(deployment = %record.id, name = ?record.name, "Relaunch failed: {}", e);
                    report.relaunch_failures += 1;
                }
            }
        }
    }

    Ok(report)
}

/// Snapshot the current storage, delete the directories being replaced,
/// unpack the backup over the install root and recreate pgdata.
/// Returns the snapshot path.
async fn replace_storage<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<PathBuf> {
    let platform = &context.platform;
    let storage = platform.storage_path();
    let backup_archive = context.backup_file(&platform.files.storage_archive);

    // Checked up front so nothing is deleted without a replacement.
    if !backup_archive.is_file() {
        return Err(AccordError::MissingInput(backup_archive));
    }

    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");
    let snapshot = platform
        .paths
        .install_root
        .join(format!("git_pgdata.snapshot_{stamp}.tar.gz"));
    let excluded = platform.storage_relative(&platform.paths.repository_dir);
    archive::create_blocking(
        storage.clone(),
        platform.paths.storage_dir.clone(),
        snapshot.clone(),
        WalkOptions::excluding(excluded),
    )
    .await?;
    info!("Storage snapshot written to {}", snapshot.display());

    for dir in &platform.paths.replaced_dirs {
        remove_tree_if_present(&storage.join(dir))?;
    }

    archive::extract_blocking(backup_archive, platform.paths.install_root.clone()).await?;
    recreate_pgdata(context, gateway).await?;
    Ok(snapshot)
}

async fn recreate_pgdata<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<()> {
    let pgdata = &context.platform.paths.pgdata_dir;
    let ownership = &context.platform.ownership;

    std::fs::create_dir_all(pgdata)?;
    gateway.set_owner(pgdata, &ownership.pgdata_owner, false).await?;
    std::fs::set_permissions(pgdata, std::fs::Permissions::from_mode(ownership.pgdata_mode))?;
    Ok(())
}

/// Unpack a consolidated archive next to the backup directory, which
/// recreates the directory under its archived name.
async fn unpack_consolidated(context: &BackupContext, path: &Path) -> Result<()> {
    let parent = context
        .backup_directory
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    info!("Unpacking {} into {}", path.display(), parent.display());
    archive::extract_blocking(path.to_path_buf(), parent).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;
    use crate::context::{Action, ContextOptions};
    use crate::executor::backup;
    use crate::gateway::ObjectKind;
    use crate::testing::FakeGateway;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const POSTGRES_POD: &str = "anaconda-enterprise-postgres-58857557d-ctbfs";
    const NEW_POSTGRES_POD: &str = "anaconda-enterprise-postgres-58857557d-x9q2w";
    const UI_POD: &str = "anaconda-enterprise-ap-ui-798b4477cc-fk626";

    const DEPLOYMENT_ROWS: &str = concat!(
        r#"{"id": "72c1caccc2144afe925b4367f377a07f", "name": "house_price_predictions", "owner": "anaconda-enterprise", "status_text": "Started"}"#,
        "\n",
        r#"{"id": "a81f", "name": "churn", "status_text": "Stopped"}"#,
        "\n",
    );

    fn platform(root: &Path) -> PlatformConfig {
        let mut platform = PlatformConfig::default();
        platform.paths.install_root = root.join("anaconda");
        platform.paths.pgdata_dir = root.join("anaconda/storage/pgdata");
        platform.paths.repository_dir = root.join("anaconda/storage/object/anaconda-repository");
        let storage = platform.storage_path();
        for dir in ["pgdata", "git/repo", "object/anaconda-repository", "object/anaconda-objects"] {
            fs::create_dir_all(storage.join(dir)).unwrap();
        }
        fs::write(storage.join("git/repo/HEAD"), b"ref: refs/heads/master").unwrap();
        fs::write(storage.join("object/anaconda-repository/pkg.tar.bz2"), b"pkg").unwrap();
        platform
    }

    /// Source cluster for producing a backup to restore from.
    fn source_cluster(platform: &PlatformConfig) -> FakeGateway {
        let mut gateway = FakeGateway::new()
            .with_instances(&[(POSTGRES_POD, "Running")])
            .with_container(POSTGRES_POD, "4b1f0c2d9e")
            .with_container_file("pg_dumpall", &platform.paths.pgdata_dir.join("full_postgres_backup.sql"))
            .with_container_file("pg_dump ", &platform.paths.pgdata_dir.join("all_repositories.tar"))
            .with_object(
                ObjectKind::ConfigMap,
                "anaconda-enterprise-anaconda-platform.yml",
                "kind: ConfigMap\nmetadata:\n  uid: abc123\n",
            );
        for name in ["cluster-tls", "anaconda-enterprise-certs", "anaconda-config-files"] {
            gateway = gateway.with_object(ObjectKind::Secret, name, "kind: Secret\n");
        }
        gateway
    }

    /// Target cluster: postgres goes away on scale down, comes back under a
    /// new name on scale up.
    fn target_cluster() -> FakeGateway {
        FakeGateway::new()
            .with_listing_sequence(&[
                &[(UI_POD, "Running")],
                &[(NEW_POSTGRES_POD, "Running"), (UI_POD, "Running")],
            ])
            .with_container(NEW_POSTGRES_POD, "7c2e9a0b11")
            .with_deployments(&["anaconda-enterprise-ap-ui", "anaconda-session-5d1e7a"])
            .with_container_output("row_to_json", DEPLOYMENT_ROWS)
    }

    fn poller() -> Poller {
        Poller::new(Duration::ZERO, None)
    }

    async fn backed_up(temp: &TempDir, repos_only: bool, create_archive: bool) -> (PlatformConfig, PathBuf) {
        let platform = platform(temp.path());
        let gateway = source_cluster(&platform);
        let backup_dir = temp.path().join("anaconda_backup");
        let mut options = ContextOptions::new(Action::Backup, &backup_dir);
        options.repos_only = repos_only;
        options.create_archive = create_archive;
        let context = BackupContext::establish(options, platform.clone(), &gateway).await.unwrap();
        backup::run(&context, &gateway).await.unwrap();
        (platform, backup_dir)
    }

    async fn restore_context(platform: PlatformConfig, options: ContextOptions) -> BackupContext {
        BackupContext::establish(options, platform, &FakeGateway::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_restore_after_backup() {
        let temp = TempDir::new().unwrap();
        let (platform, backup_dir) = backed_up(&temp, false, false).await;
        let storage = platform.storage_path();
        fs::write(storage.join("git/repo/stale"), b"written after backup").unwrap();

        let mut options = ContextOptions::new(Action::Restore, &backup_dir);
        options.start_deployments = true;
        let context = restore_context(platform.clone(), options).await;
        assert!(context.signal.is_present());

        let gateway = target_cluster();
        let report = run(&context, &gateway, &poller()).await.unwrap();

        assert!(!context.signal.is_present());
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.relaunched, 1);
        assert_eq!(gateway.relaunched(), vec!["72c1caccc2144afe925b4367f377a07f".to_string()]);

        let objects = report.objects.unwrap();
        assert_eq!(objects.replaced, 4);
        assert!(objects.failed.is_empty());

        // storage replaced from the backup, repository left in place
        assert!(storage.join("git/repo/HEAD").is_file());
        assert!(!storage.join("git/repo/stale").exists());
        assert!(storage.join("object/anaconda-repository/pkg.tar.bz2").is_file());

        let pgdata = &platform.paths.pgdata_dir;
        assert_eq!(fs::metadata(pgdata).unwrap().permissions().mode() & 0o777, 0o700);
        assert!(pgdata.join("full_postgres_backup.sql").is_file());
        assert!(gateway.owners().contains(&(pgdata.clone(), "polkitd:root".to_string(), false)));

        let snapshot = report.snapshot.unwrap();
        assert_eq!(snapshot.parent(), Some(platform.paths.install_root.as_path()));
        assert!(archive::verify(&snapshot).unwrap() > 0);

        let calls = gateway.calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        assert!(position("delete_deployment anaconda-session-5d1e7a") < position("scale anaconda-enterprise-postgres 0"));
        assert!(position("scale anaconda-enterprise-postgres 0") < position("scale anaconda-enterprise-postgres 1"));
        assert!(position("scale anaconda-enterprise-postgres 1") < position("replace anaconda-config-files.yaml"));
        assert!(position("replace anaconda-config-files.yaml") < position("delete_all_instances default"));
        assert!(position("delete_all_instances default") < position("relaunch 72c1caccc2144afe925b4367f377a07f"));

        let commands = gateway.container_commands();
        assert!(commands[0].contains("psql -U postgres < /var/lib/postgresql/data/full_postgres_backup.sql"));
        assert!(gateway.calls().contains(&"run_in_container 7c2e9a0b11".to_string()));
    }

    #[tokio::test]
    async fn test_override_restore_without_signal() {
        let temp = TempDir::new().unwrap();
        let (platform, backup_dir) = backed_up(&temp, false, false).await;
        fs::remove_file(backup_dir.join(crate::signal::SIGNAL_FILE_NAME)).unwrap();

        let mut options = ContextOptions::new(Action::Restore, &backup_dir);
        options.override_restore_check = true;
        let context = restore_context(platform.clone(), options).await;
        assert!(!context.signal.is_present());

        let gateway = target_cluster();
        let report = run(&context, &gateway, &poller()).await.unwrap();

        assert!(!context.signal.is_present());
        assert_eq!(report.objects.unwrap().replaced, 4);
        assert_eq!(report.relaunched, 0);
        assert!(platform.storage_path().join("git/repo/HEAD").is_file());
    }

    #[tokio::test]
    async fn test_skip_config_and_relaunch_failures() {
        let temp = TempDir::new().unwrap();
        let (platform, backup_dir) = backed_up(&temp, false, false).await;

        let mut options = ContextOptions::new(Action::Restore, &backup_dir);
        options.skip_config_restore = true;
        options.start_deployments = true;
        let context = restore_context(platform, options).await;

        let gateway = target_cluster().fail_relaunch();
        let report = run(&context, &gateway, &poller()).await.unwrap();

        assert!(report.objects.is_none());
        assert!(!gateway.calls().iter().any(|c| c.starts_with("replace ")));
        assert_eq!(report.relaunched, 0);
        assert_eq!(report.relaunch_failures, 1);
        assert!(!context.signal.is_present());
    }

    #[tokio::test]
    async fn test_missing_storage_archive_deletes_nothing() {
        let temp = TempDir::new().unwrap();
        let platform = platform(temp.path());
        let storage = platform.storage_path();
        let backup_dir = temp.path().join("anaconda_backup");
        fs::create_dir_all(&backup_dir).unwrap();

        let mut options = ContextOptions::new(Action::Restore, &backup_dir);
        options.override_restore_check = true;
        let context = restore_context(platform, options).await;

        let gateway = target_cluster();
        let err = run(&context, &gateway, &poller()).await.unwrap_err();
        assert!(matches!(err, AccordError::MissingInput(_)));
        assert!(storage.join("git/repo/HEAD").is_file());
        assert!(!gateway.calls().contains(&"scale anaconda-enterprise-postgres 1".to_string()));
    }

    #[tokio::test]
    async fn test_repos_only_restore() {
        let temp = TempDir::new().unwrap();
        let (platform, backup_dir) = backed_up(&temp, true, false).await;

        let mut options = ContextOptions::new(Action::Restore, &backup_dir);
        options.repos_only = true;
        let context = restore_context(platform.clone(), options).await;

        let gateway = FakeGateway::new()
            .with_instances(&[(POSTGRES_POD, "Running")])
            .with_container(POSTGRES_POD, "4b1f0c2d9e");
        let report = run(&context, &gateway, &poller()).await.unwrap();

        assert!(report.started.is_empty());
        assert_eq!(gateway.container_commands().len(), 1);
        assert!(!gateway.calls().iter().any(|c| c.starts_with("scale ")));
        assert!(platform.paths.pgdata_dir.join("all_repositories.tar").is_file());
        assert!(!context.signal.is_present());
    }

    #[tokio::test]
    async fn test_restore_from_consolidated_archive() {
        let temp = TempDir::new().unwrap();
        let (platform, backup_dir) = backed_up(&temp, true, true).await;

        let archive = fs::read_dir(&backup_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.to_string_lossy().ends_with(".tar.gz"))
            .unwrap();
        let carried = temp.path().join("carried.tar.gz");
        fs::rename(&archive, &carried).unwrap();
        fs::remove_dir_all(&backup_dir).unwrap();

        let mut options = ContextOptions::new(Action::Restore, &backup_dir);
        options.repos_only = true;
        options.restore_archive = Some(carried);
        let context = restore_context(platform, options).await;

        let gateway = FakeGateway::new()
            .with_instances(&[(POSTGRES_POD, "Running")])
            .with_container(POSTGRES_POD, "4b1f0c2d9e");
        run(&context, &gateway, &poller()).await.unwrap();

        assert!(gateway.container_commands()[0].contains("pg_restore"));
        assert!(!context.signal.is_present());
    }

    #[tokio::test]
    async fn test_invalid_consolidated_archive() {
        let temp = TempDir::new().unwrap();
        let platform = platform(temp.path());
        let bogus = temp.path().join("ae5_backup_20190610-1403.tar.gz");
        fs::write(&bogus, b"not a tarball").unwrap();

        let mut options = ContextOptions::new(Action::Restore, temp.path().join("anaconda_backup"));
        options.restore_archive = Some(bogus);
        let context = restore_context(platform, options).await;

        let gateway = FakeGateway::new();
        let err = run(&context, &gateway, &poller()).await.unwrap_err();
        assert!(matches!(err, AccordError::InvalidArchive { .. }));
        assert!(gateway.calls().is_empty());
    }
}
