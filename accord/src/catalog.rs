//! Secrets and config maps carried between clusters.
//!
//! Objects are exported as YAML into `{backup}/secrets/{name}.yaml`, stripped
//! of metadata that only makes sense on the source cluster, and replayed
//! with replace-or-create on restore.

use crate::gateway::{Gateway, Lookup, ObjectApply, ObjectKind};
use crate::utils::{AccordError, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Metadata keys assigned by the source cluster.
pub const VOLATILE_METADATA: [&str; 4] = ["creationTimestamp", "resourceVersion", "selfLink", "uid"];

/// Names to export, grouped by namespace, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCatalog {
    pub kind: ObjectKind,
    entries: BTreeMap<String, Vec<String>>,
}

impl ObjectCatalog {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Secrets every AE5 install carries.
    pub fn platform_secrets() -> Self {
        let mut catalog = Self::new(ObjectKind::Secret);
        catalog.insert("kube-system", "cluster-tls");
        catalog.insert("default", "anaconda-enterprise-certs");
        catalog.insert("default", "anaconda-config-files");
        catalog
    }

    /// Config maps every AE5 install carries.
    pub fn platform_config_maps() -> Self {
        let mut catalog = Self::new(ObjectKind::ConfigMap);
        catalog.insert("default", "anaconda-enterprise-anaconda-platform.yml");
        catalog
    }

    /// Add `name` under `namespace` unless already present.
    pub fn insert(&mut self, namespace: &str, name: &str) {
        let names = self.entries.entry(namespace.to_string()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(ns, names)| names.iter().map(move |n| (ns.as_str(), n.as_str())))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append every object in `namespace` whose name contains `marker`.
    pub async fn discover<G: Gateway>(&mut self, gateway: &G, namespace: &str, marker: &str) -> Result<usize> {
        let found = gateway.list_objects(self.kind, namespace).await?;
        let mut added = 0;
        for name in found.iter().filter(|n| n.contains(marker)) {
            let before = self.len();
            self.insert(namespace, name);
            added += self.len() - before;
        }
        if added > 0 {
            info!(namespace, added, kind = self.kind.resource(), "Discovered objects");
        }
        Ok(added)
    }

    /// Write each object to `{directory}/{name}.yaml`. A missing object is
    /// fatal.
    pub async fn export<G: Gateway>(&self, gateway: &G, directory: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(directory)?;
        let mut written = Vec::with_capacity(self.len());

        for (namespace, name) in self.iter() {
            let yaml = match gateway.get_object(self.kind, name, namespace).await? {
                Lookup::Found(yaml) => yaml,
                Lookup::NoneFound => return Err(self.not_found(namespace, name)),
            };
            let path = directory.join(format!("{name}.yaml"));
            std::fs::write(&path, yaml)?;
            info!(kind = self.kind.resource(), namespace, name, "Exported");
            written.push(path);
        }

        Ok(written)
    }

    fn not_found(&self, namespace: &str, name: &str) -> AccordError {
        let (name, namespace) = (name.to_string(), namespace.to_string());
        match self.kind {
            ObjectKind::Secret => AccordError::SecretNotFound { name, namespace },
            ObjectKind::ConfigMap => AccordError::ConfigObjectNotFound { name, namespace },
        }
    }
}

/// Remove the volatile metadata keys from an object. Returns whether
/// anything was removed; every other field is left as it was.
pub fn sanitize(object: &mut Value) -> bool {
    let Some(metadata) = object.get_mut("metadata").and_then(Value::as_mapping_mut) else {
        return false;
    };
    let mut removed = false;
    for key in VOLATILE_METADATA {
        removed |= metadata.shift_remove(key).is_some();
    }
    removed
}

/// Sanitize an exported file in place.
pub fn sanitize_file(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut object: Value = serde_yaml::from_str(&content)?;
    if sanitize(&mut object) {
        std::fs::write(path, serde_yaml::to_string(&object)?)?;
    }
    Ok(())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub replaced: usize,
    pub created: usize,
    pub failed: Vec<PathBuf>,
}

/// Replay every `*.yaml` in `directory`: replace, or create when the object
/// does not exist. A failure is logged and the next object is tried.
pub async fn restore_objects<G: Gateway>(gateway: &G, directory: &Path) -> Result<RestoreSummary> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(directory = %directory.display(), "No exported objects to restore");
            return Ok(RestoreSummary::default());
        }
        Err(e) => return Err(e.into()),
    };
    let mut manifests: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    manifests.sort();

    let mut summary = RestoreSummary::default();
    for manifest in manifests {
        match apply(gateway, &manifest).await {
            Ok(Applied::Replaced) => summary.replaced += 1,
            Ok(Applied::Created) => summary.created += 1,
            Err(reason) => {
                warn!(manifest = %manifest.display(), %reason, "Could not restore object, skipping");
                summary.failed.push(manifest);
            }
        }
    }

    info!(
        replaced = summary.replaced,
        created = summary.created,
        failed = summary.failed.len(),
        "Objects restored"
    );
    Ok(summary)
}

enum Applied {
    Replaced,
    Created,
}

async fn apply<G: Gateway>(gateway: &G, manifest: &Path) -> std::result::Result<Applied, String> {
    match gateway.replace_object(manifest).await.map_err(|e| e.to_string())? {
        ObjectApply::Applied => Ok(Applied::Replaced),
        ObjectApply::Rejected(reason) => Err(reason),
        ObjectApply::NotFound => match gateway.create_object(manifest).await.map_err(|e| e.to_string())? {
            ObjectApply::Applied => Ok(Applied::Created),
            ObjectApply::NotFound => Err("create reported not found".to_string()),
            ObjectApply::Rejected(reason) => Err(reason),
        },
    }
}
