//! Per-invocation context.
//!
//! [`BackupContext`] is built once from the invocation options and never
//! changes afterwards. [`RuntimeState`] holds the only values discovered
//! while running: which postgres instance and container are current.

use crate::config::PlatformConfig;
use crate::gateway::{remote, Gateway, Lookup};
use crate::poll;
use crate::signal::SignalFile;
use crate::utils::{AccordError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    Backup,
    Restore,
}

/// Options as given on the command line.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub action: Action,
    pub directory: PathBuf,
    pub repos_only: bool,
    pub sync: bool,
    pub sync_user: String,
    pub sync_node: Option<String>,
    pub override_restore_check: bool,
    pub skip_config_restore: bool,
    pub start_deployments: bool,
    pub create_archive: bool,
    pub restore_archive: Option<PathBuf>,
}

impl ContextOptions {
    pub fn new(action: Action, directory: impl Into<PathBuf>) -> Self {
        Self {
            action,
            directory: directory.into(),
            repos_only: false,
            sync: false,
            sync_user: "root".to_string(),
            sync_node: None,
            override_restore_check: false,
            skip_config_restore: false,
            start_deployments: false,
            create_archive: false,
            restore_archive: None,
        }
    }
}

/// Where backups are mirrored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub user: String,
    pub node: String,
}

#[derive(Debug, Clone)]
pub struct BackupContext {
    pub action: Action,
    pub backup_directory: PathBuf,
    pub repos_only: bool,
    pub sync: Option<SyncTarget>,
    pub override_restore_check: bool,
    pub skip_config_restore: bool,
    pub start_deployments: bool,
    pub create_archive: bool,
    pub restore_archive: Option<PathBuf>,
    pub signal: SignalFile,
    pub platform: PlatformConfig,
}

impl BackupContext {
    /// Validate `options` and prepare the backup directory.
    ///
    /// Checks run in a fixed order, each failing with its own error: restore
    /// signal, sync target, sync reachability. A backup then creates the
    /// directory (locally and on the sync node) and clears any stale signal.
    pub async fn establish<G: Gateway>(
        options: ContextOptions,
        platform: PlatformConfig,
        gateway: &G,
    ) -> Result<Self> {
        let backup_directory = normalize_directory(&options.directory);
        let signal = SignalFile::new(&backup_directory);

        if options.action == Action::Restore
            && !options.override_restore_check
            && options.restore_archive.is_none()
            && !signal.is_present()
        {
            return Err(AccordError::RestoreNotSignaled(signal.path().to_path_buf()));
        }

        let sync = match (options.action, options.sync) {
            (Action::Backup, true) => {
                let node = options
                    .sync_node
                    .filter(|n| !n.trim().is_empty())
                    .ok_or(AccordError::MissingSyncTarget)?;
                Some(SyncTarget {
                    user: options.sync_user,
                    node,
                })
            }
            (Action::Restore, true) => {
                warn!("Sync is only performed after a backup, ignoring --sync for restore");
                None
            }
            (_, false) => None,
        };

        if let Some(target) = &sync {
            probe_sync_target(gateway, target, &platform).await?;
        }

        let context = Self {
            action: options.action,
            backup_directory,
            repos_only: options.repos_only,
            sync,
            override_restore_check: options.override_restore_check,
            skip_config_restore: options.skip_config_restore,
            start_deployments: options.start_deployments,
            create_archive: options.create_archive,
            restore_archive: options.restore_archive,
            signal,
            platform,
        };

        if context.action == Action::Backup {
            context.prepare_backup_directory(gateway).await?;
            context.signal.clear()?;
        }

        Ok(context)
    }

    async fn prepare_backup_directory<G: Gateway>(&self, gateway: &G) -> Result<()> {
        std::fs::create_dir_all(&self.backup_directory)?;

        if let Some(target) = &self.sync {
            let directory = self.backup_directory.display();
            gateway
                .run_as_user(
                    &target.user,
                    &remote::ssh_sudo(&target.user, &target.node, &format!("mkdir -p {directory}")),
                )
                .await?;
            gateway
                .run_as_user(
                    &target.user,
                    &remote::ssh_sudo(
                        &target.user,
                        &target.node,
                        &format!("chown -R {0}:{0} {directory}", target.user),
                    ),
                )
                .await?;
        }
        Ok(())
    }

    /// `{backup_directory}/{name}`
    pub fn backup_file(&self, name: &str) -> PathBuf {
        self.backup_directory.join(name)
    }

    /// Directory holding exported secrets and config maps.
    pub fn secrets_directory(&self) -> PathBuf {
        self.backup_directory.join("secrets")
    }

    /// A dump file as seen by the host, inside the postgres data directory.
    pub fn host_dump_path(&self, name: &str) -> PathBuf {
        self.platform.paths.pgdata_dir.join(name)
    }

    /// The same dump file as seen from inside the postgres container.
    pub fn container_dump_path(&self, name: &str) -> PathBuf {
        self.platform.paths.pgdata_container_dir.join(name)
    }
}

fn normalize_directory(directory: &Path) -> PathBuf {
    // PathBuf keeps a trailing separator in its string form; rebuild from
    // components so `/opt/anaconda_backup/` and `/opt/anaconda_backup` agree.
    directory.components().collect()
}

async fn probe_sync_target<G: Gateway>(gateway: &G, target: &SyncTarget, platform: &PlatformConfig) -> Result<()> {
    let probe = remote::ssh_sudo(
        &target.user,
        &target.node,
        &format!("test -d {}", platform.paths.install_root.display()),
    );
    gateway.run_as_user(&target.user, &probe).await.map_err(|e| {
        AccordError::SyncUnreachable {
            user: target.user.clone(),
            node: target.node.clone(),
            source: Box::new(e),
        }
    })?;
    info!(node = %target.node, user = %target.user, "Sync node reachable");
    Ok(())
}

/// Postgres instance and container discovered at run time. Refreshed before
/// every database step, since scaling replaces the instance.
#[derive(Debug, Default, Clone)]
pub struct RuntimeState {
    pub postgres_instance: Option<String>,
    pub container_id: Option<String>,
}

impl RuntimeState {
    /// Look up the current postgres instance and its container.
    ///
    /// Leaves the fields unset when nothing matches; use [`Self::container`]
    /// to get the id as a checked value.
    pub async fn refresh<G: Gateway>(&mut self, gateway: &G, platform: &PlatformConfig) -> Result<()> {
        let cluster = &platform.cluster;
        self.postgres_instance = None;
        self.container_id = None;

        let instances = gateway.list_instances(&cluster.namespace).await?;
        let instance = match poll::matching(&instances, &cluster.postgres_marker) {
            Lookup::Found(found) => found[0].name.clone(),
            Lookup::NoneFound => {
                warn!(marker = %cluster.postgres_marker, "No postgres instance listed");
                return Ok(());
            }
        };

        self.container_id = gateway.container_id(&instance, &cluster.namespace).await?.into_option();
        self.postgres_instance = Some(instance);
        Ok(())
    }

    pub fn container(&self, marker: &str) -> Result<&str> {
        self.container_id
            .as_deref()
            .ok_or_else(|| AccordError::ContainerNotResolved(marker.to_string()))
    }
}
