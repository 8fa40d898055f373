//! Error taxonomy for backup and restore runs.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccordError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node to sync files to was not provided, pass --sync-node with the node name")]
    MissingSyncTarget,

    #[error("Restore signal file not found at {0}, not performing restore")]
    RestoreNotSignaled(PathBuf),

    #[error("Unable to reach sync node {node} as {user}: {source}")]
    SyncUnreachable {
        user: String,
        node: String,
        #[source]
        source: Box<AccordError>,
    },

    #[error("Backup file was not produced: {0}")]
    BackupMissing(PathBuf),

    #[error("Required file not found: {0}")]
    MissingInput(PathBuf),

    #[error("Not a valid tar archive: {path} ({reason})")]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("No running container found for workload matching '{0}'")]
    ContainerNotResolved(String),

    #[error("Secret {name} not found in namespace {namespace}")]
    SecretNotFound { name: String, namespace: String },

    #[error("Config map {name} not found in namespace {namespace}")]
    ConfigObjectNotFound { name: String, namespace: String },

    #[error("Command `{program}` failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Command in container {container} failed: {reason}")]
    ContainerCommandFailed { container: String, reason: String },

    #[error("Gave up waiting for {condition} after {waited_secs}s")]
    PollTimeout { condition: String, waited_secs: u64 },

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Invalid replica count {0}, only 0 or 1 are allowed")]
    InvalidReplicaCount(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broad failure classes, used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    SignalProtocol,
    DataIntegrity,
    ObjectNotFound,
    RemoteExecution,
    InvalidParameter,
    Io,
}

impl AccordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccordError::Config(_) | AccordError::MissingSyncTarget => ErrorKind::Configuration,
            AccordError::RestoreNotSignaled(_) => ErrorKind::SignalProtocol,
            AccordError::BackupMissing(_)
            | AccordError::MissingInput(_)
            | AccordError::InvalidArchive { .. }
            | AccordError::ContainerNotResolved(_)
            | AccordError::Serialization(_)
            | AccordError::Yaml(_) => ErrorKind::DataIntegrity,
            AccordError::SecretNotFound { .. } | AccordError::ConfigObjectNotFound { .. } => {
                ErrorKind::ObjectNotFound
            }
            AccordError::SyncUnreachable { .. }
            | AccordError::CommandFailed { .. }
            | AccordError::ContainerCommandFailed { .. }
            | AccordError::PollTimeout { .. }
            | AccordError::Unsupported(_) => ErrorKind::RemoteExecution,
            AccordError::InvalidReplicaCount(_) => ErrorKind::InvalidParameter,
            AccordError::Io(_) => ErrorKind::Io,
        }
    }

    /// Process exit code for this failure. Every failure exits 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T> = std::result::Result<T, AccordError>;
