//! Boundary to everything outside this process: the cluster API, commands
//! inside the postgres container, privileged and remote shells, and file
//! ownership on the host.
//!
//! Pipelines only see structured records. Parsing of tool output lives in
//! [`parse`] and is used by [`system::SystemGateway`] alone.

pub mod parse;
pub mod remote;
pub mod system;

use crate::utils::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

pub use system::SystemGateway;

/// Outcome of a filter or lookup: either something matched or nothing did.
/// "Nothing" is a normal answer, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NoneFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NoneFound => None,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Lookup::Found(v),
            None => Lookup::NoneFound,
        }
    }
}

impl<T> Lookup<Vec<T>> {
    /// `Found` for a non-empty list, `NoneFound` otherwise.
    pub fn from_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            Lookup::NoneFound
        } else {
            Lookup::Found(items)
        }
    }
}

/// One running unit of a workload, as listed by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub name: String,
    /// Ready containers, e.g. `1/1`
    pub ready: String,
    pub status: String,
}

impl InstanceRecord {
    pub fn is_running(&self) -> bool {
        self.status == "Running"
    }
}

/// Exportable cluster object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Secret,
    ConfigMap,
}

impl ObjectKind {
    pub fn resource(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "secrets",
            ObjectKind::ConfigMap => "configmaps",
        }
    }
}

/// Result of submitting an object manifest to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectApply {
    Applied,
    /// The object does not exist yet (replace only)
    NotFound,
    Rejected(String),
}

/// A row of the deployments table, captured before it is truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(default, deserialize_with = "id_text")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Every other column, kept for relaunching
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Ids are text in current schemas but numeric in some older ones; a
/// missing id reads as empty.
fn id_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => id,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl DeploymentRecord {
    pub fn is_started(&self) -> bool {
        self.status_text.as_deref() == Some("Started")
    }
}

/// Operations the pipelines need from the outside world.
///
/// Every call reports failure through `Result`; whether a failure aborts the
/// run is decided by the caller.
#[allow(async_fn_in_trait)]
pub trait Gateway {
    /// Instances in `namespace`, header excluded.
    async fn list_instances(&self, namespace: &str) -> Result<Vec<InstanceRecord>>;

    /// Container id backing `instance`, if its description names one.
    async fn container_id(&self, instance: &str, namespace: &str) -> Result<Lookup<String>>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<String>>;

    async fn scale_deployment(&self, name: &str, namespace: &str, replicas: u32) -> Result<()>;

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<()>;

    async fn delete_all_instances(&self, namespace: &str) -> Result<()>;

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<String>>;

    /// The object rendered as YAML.
    async fn get_object(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<Lookup<String>>;

    async fn replace_object(&self, manifest: &Path) -> Result<ObjectApply>;

    async fn create_object(&self, manifest: &Path) -> Result<ObjectApply>;

    /// Write the orchestrator's own state backup to `destination`.
    async fn snapshot_cluster_state(&self, destination: &Path) -> Result<()>;

    /// Run `command` through a shell inside `container`, returning stdout.
    async fn run_in_container(&self, container: &str, command: &str) -> Result<Vec<u8>>;

    /// Run `command` as `user` through a login shell.
    async fn run_as_user(&self, user: &str, command: &str) -> Result<()>;

    /// Change ownership of `path` to `owner` (`user:group`).
    async fn set_owner(&self, path: &Path, owner: &str, recursive: bool) -> Result<()>;

    async fn relaunch_deployment(&self, record: &DeploymentRecord) -> Result<()>;
}
