//! Backup and restore pipelines and the steps they are built from.

pub mod backup;
pub mod database;
pub mod restore;
pub mod workload;

pub use backup::BackupReport;
pub use restore::RestoreReport;

use crate::context::{Action, BackupContext};
use crate::gateway::Gateway;
use crate::poll::Poller;
use crate::utils::Result;
use tracing::info;

#[derive(Debug)]
pub enum Outcome {
    Backup(BackupReport),
    Restore(RestoreReport),
}

/// Run the pipeline for the context's action.
pub async fn run<G: Gateway>(context: &BackupContext, gateway: &G) -> Result<Outcome> {
    let poller = Poller::new(context.platform.poll_interval(), context.platform.max_wait());
    info!(
        "Starting {:?} of {} (repos only: {})",
        context.action,
        context.backup_directory.display(),
        context.repos_only
    );

    match context.action {
        Action::Backup => backup::run(context, gateway).await.map(Outcome::Backup),
        Action::Restore => restore::run(context, gateway, &poller).await.map(Outcome::Restore),
    }
}
