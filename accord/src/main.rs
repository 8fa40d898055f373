//! Accord - Main entry point

use accord::context::{Action, BackupContext, ContextOptions};
use accord::executor::{self, Outcome};
use accord::{utils, PlatformConfig, SystemGateway};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform
    #[arg(short, long, value_enum, default_value = "backup")]
    action: Action,

    /// Backup directory
    #[arg(short, long, default_value = "/opt/anaconda_backup")]
    directory: PathBuf,

    /// Mirror the backup to another node with rsync after a backup
    #[arg(short, long)]
    sync: bool,

    /// User whose SSH keys are used for the sync
    #[arg(short = 'u', long, default_value = "root")]
    sync_user: String,

    /// Node to sync the backup to
    #[arg(short = 'n', long)]
    sync_node: Option<String>,

    /// Restore even if the restore signal file is missing
    #[arg(long = "override")]
    override_restore_check: bool,

    /// Do not restore secrets and config maps
    #[arg(long = "no-config")]
    no_config: bool,

    /// Only back up or restore the repository database
    #[arg(long)]
    repos_only: bool,

    /// Relaunch deployments that were running on the source cluster
    #[arg(long)]
    start_deployments: bool,

    /// Also pack the backup directory into a single archive
    #[arg(long)]
    archive: bool,

    /// Consolidated archive to restore from
    #[arg(long, value_name = "FILE")]
    restore_file: Option<PathBuf>,

    /// Give up waiting for the cluster after this many seconds
    #[arg(long, value_name = "SECS")]
    max_wait: Option<u64>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
}

impl Args {
    fn context_options(&self) -> ContextOptions {
        let mut options = ContextOptions::new(self.action, &self.directory);
        options.repos_only = self.repos_only;
        options.sync = self.sync;
        options.sync_user = self.sync_user.clone();
        options.sync_node = self.sync_node.clone();
        options.override_restore_check = self.override_restore_check;
        options.skip_config_restore = self.no_config;
        options.start_deployments = self.start_deployments;
        options.create_archive = self.archive;
        options.restore_archive = self.restore_file.clone();
        options
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = PlatformConfig::load(args.config.as_deref())?;
    if let Some(secs) = args.max_wait {
        config.poll.max_wait_secs = Some(secs);
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }

    if args.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // Initialize logging
    utils::logger::init(&config.log.level, config.log.file.as_deref())?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::info!("Starting accord v{} on {} ({:?})", env!("CARGO_PKG_VERSION"), host, args.action);

    let gateway = SystemGateway::new(config.cluster.clone());

    let outcome = match BackupContext::establish(args.context_options(), config, &gateway).await {
        Ok(context) => executor::run(&context, &gateway).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(Outcome::Backup(report)) => {
            tracing::info!("Backup finished: {} files, {} objects", report.files.len(), report.exported_objects);
            if let Some(archive) = report.archive {
                tracing::info!("Consolidated archive: {}", archive.display());
            }
            Ok(())
        }
        Ok(Outcome::Restore(report)) => {
            tracing::info!(
                "Restore finished: {} started deployments captured, {} relaunched",
                report.started.len(),
                report.relaunched
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{}", e);
            std::process::exit(e.exit_code());
        }
    }
}
