//! Platform configuration.
//!
//! Paths, object names and timings the pipelines depend on. Defaults match a
//! stock AE5 install; a TOML file and `ACCORD__*` environment variables may
//! override any field.

use crate::utils::{AccordError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub ownership: OwnershipConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the platform install; the storage archive is rooted here
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Storage directory name under `install_root`
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Host path of the postgres data directory
    #[serde(default = "default_pgdata_dir")]
    pub pgdata_dir: PathBuf,

    /// The same directory as seen from inside the postgres container
    #[serde(default = "default_pgdata_container_dir")]
    pub pgdata_container_dir: PathBuf,

    /// Repository object store
    #[serde(default = "default_repository_dir")]
    pub repository_dir: PathBuf,

    /// Directories under storage that a restore deletes and replaces
    #[serde(default = "default_replaced_dirs")]
    pub replaced_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_postgres_dump")]
    pub postgres_dump: String,
    #[serde(default = "default_repository_dump")]
    pub repository_dump: String,
    #[serde(default = "default_storage_archive")]
    pub storage_archive: String,
    #[serde(default = "default_cluster_state")]
    pub cluster_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Deployment scaled down/up around the filesystem restore
    #[serde(default = "default_postgres_deployment")]
    pub postgres_deployment: String,

    /// Substring identifying postgres instances in a listing
    #[serde(default = "default_postgres_marker")]
    pub postgres_marker: String,

    /// Marker preceding the container id in an instance description
    #[serde(default = "default_container_uri_marker")]
    pub container_uri_marker: String,

    /// Deployments with these prefixes are user sessions and apps
    #[serde(default = "default_workload_prefixes")]
    pub workload_prefixes: Vec<String>,

    /// Secrets whose name contains this marker are exported too
    #[serde(default = "default_credential_secret_marker")]
    pub credential_secret_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipConfig {
    /// Owner applied to a dump before the container reads it
    #[serde(default = "default_dump_owner")]
    pub dump_owner: String,

    /// Owner of the recreated postgres data directory
    #[serde(default = "default_pgdata_owner")]
    pub pgdata_owner: String,

    #[serde(default = "default_pgdata_mode")]
    pub pgdata_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound on any single wait. Unset waits forever.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log output here as well as stdout
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

// Default values
fn default_install_root() -> PathBuf {
    PathBuf::from("/opt/anaconda")
}

fn default_storage_dir() -> String {
    "storage".to_string()
}

fn default_pgdata_dir() -> PathBuf {
    PathBuf::from("/opt/anaconda/storage/pgdata")
}

fn default_pgdata_container_dir() -> PathBuf {
    PathBuf::from("/var/lib/postgresql/data")
}

fn default_repository_dir() -> PathBuf {
    PathBuf::from("/opt/anaconda/storage/object/anaconda-repository")
}

fn default_replaced_dirs() -> Vec<String> {
    ["git", "pgdata", "object/anaconda-objects", "object/anaconda-projects"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_postgres_dump() -> String {
    "full_postgres_backup.sql".to_string()
}

fn default_repository_dump() -> String {
    "all_repositories.tar".to_string()
}

fn default_storage_archive() -> String {
    "storage_backup.tar.gz".to_string()
}

fn default_cluster_state() -> String {
    "var_lib_gravity_backup.tar.gz".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_postgres_deployment() -> String {
    "anaconda-enterprise-postgres".to_string()
}

fn default_postgres_marker() -> String {
    "postgres".to_string()
}

fn default_container_uri_marker() -> String {
    "docker://".to_string()
}

fn default_workload_prefixes() -> Vec<String> {
    vec!["anaconda-app-".to_string(), "anaconda-session-".to_string()]
}

fn default_credential_secret_marker() -> String {
    "anaconda-credentials-user".to_string()
}

fn default_dump_owner() -> String {
    "polkitd:input".to_string()
}

fn default_pgdata_owner() -> String {
    "polkitd:root".to_string()
}

fn default_pgdata_mode() -> u32 {
    0o700
}

fn default_interval_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("/opt/anaconda/accord.log"))
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            storage_dir: default_storage_dir(),
            pgdata_dir: default_pgdata_dir(),
            pgdata_container_dir: default_pgdata_container_dir(),
            repository_dir: default_repository_dir(),
            replaced_dirs: default_replaced_dirs(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            postgres_dump: default_postgres_dump(),
            repository_dump: default_repository_dump(),
            storage_archive: default_storage_archive(),
            cluster_state: default_cluster_state(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            postgres_deployment: default_postgres_deployment(),
            postgres_marker: default_postgres_marker(),
            container_uri_marker: default_container_uri_marker(),
            workload_prefixes: default_workload_prefixes(),
            credential_secret_marker: default_credential_secret_marker(),
        }
    }
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            dump_owner: default_dump_owner(),
            pgdata_owner: default_pgdata_owner(),
            pgdata_mode: default_pgdata_mode(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_wait_secs: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            files: FilesConfig::default(),
            cluster: ClusterConfig::default(),
            ownership: OwnershipConfig::default(),
            poll: PollConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `ACCORD__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(AccordError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ACCORD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<PlatformConfig>())
            .map_err(|e| AccordError::Config(e.to_string()))
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AccordError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AccordError::Config(e.to_string()))
    }

    /// Directory archived by the filesystem backup, e.g. `/opt/anaconda/storage`.
    pub fn storage_path(&self) -> PathBuf {
        self.paths.install_root.join(&self.paths.storage_dir)
    }

    /// `path` relative to the storage directory, if it lies inside it.
    pub fn storage_relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(self.storage_path()).ok().map(Path::to_path_buf)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.poll.max_wait_secs.map(Duration::from_secs)
    }
}
