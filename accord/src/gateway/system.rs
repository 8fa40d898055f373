//! Gateway backed by the real tools: `kubectl`, `gravity`, `su` and chown.

use super::{parse, DeploymentRecord, Gateway, InstanceRecord, Lookup, ObjectApply, ObjectKind};
use crate::config::ClusterConfig;
use crate::utils::{AccordError, Result};
use nix::unistd::{chown, Group, User};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

pub struct SystemGateway {
    cluster: ClusterConfig,
}

impl SystemGateway {
    pub fn new(cluster: ClusterConfig) -> Self {
        Self { cluster }
    }

    async fn output(program: &str, args: &[&str]) -> Result<Output> {
        debug!(program, ?args, "Running command");
        Ok(Command::new(program).args(args).output().await?)
    }

    /// Run and require a zero exit status, returning stdout.
    async fn checked(program: &str, args: &[&str]) -> Result<String> {
        let output = Self::output(program, args).await?;
        if !output.status.success() {
            return Err(command_failed(program, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn kubectl(args: &[&str]) -> Result<String> {
        Self::checked("kubectl", args).await
    }

    async fn apply(verb: &str, manifest: &Path) -> Result<ObjectApply> {
        let manifest = manifest.to_string_lossy();
        let output = Self::output("kubectl", &[verb, "-f", &manifest]).await?;
        Ok(parse::object_apply(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

fn command_failed(program: &str, output: &Output) -> AccordError {
    AccordError::CommandFailed {
        program: program.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Resolve `user:group` (group optional) to numeric ids.
fn resolve_owner(owner: &str) -> Result<(User, Option<Group>)> {
    let (user_name, group_name) = match owner.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (owner, None),
    };
    let user = User::from_name(user_name)
        .map_err(std::io::Error::from)?
        .ok_or_else(|| AccordError::Config(format!("unknown user '{}'", user_name)))?;
    let group = match group_name {
        Some(name) => Some(
            Group::from_name(name)
                .map_err(std::io::Error::from)?
                .ok_or_else(|| AccordError::Config(format!("unknown group '{}'", name)))?,
        ),
        None => None,
    };
    Ok((user, group))
}

fn chown_tree(path: &Path, owner: &str, recursive: bool) -> Result<()> {
    let (user, group) = resolve_owner(owner)?;
    let gid = group.map(|g| g.gid);
    let targets: Vec<PathBuf> = if recursive {
        walkdir::WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .map(|entry| entry.map(|e| e.into_path()).map_err(std::io::Error::from))
            .collect::<std::io::Result<_>>()?
    } else {
        vec![path.to_path_buf()]
    };
    for target in targets {
        chown(&target, Some(user.uid), gid).map_err(std::io::Error::from)?;
    }
    Ok(())
}

impl Gateway for SystemGateway {
    async fn list_instances(&self, namespace: &str) -> Result<Vec<InstanceRecord>> {
        let table = Self::kubectl(&["get", "pods", "-n", namespace]).await?;
        Ok(parse::instance_table(&table))
    }

    async fn container_id(&self, instance: &str, namespace: &str) -> Result<Lookup<String>> {
        let description = Self::kubectl(&["describe", "pod", instance, "-n", namespace]).await?;
        Ok(parse::container_id(&description, &self.cluster.container_uri_marker))
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<String>> {
        let table = Self::kubectl(&["get", "deployments", "-n", namespace]).await?;
        Ok(parse::name_column(&table))
    }

    async fn scale_deployment(&self, name: &str, namespace: &str, replicas: u32) -> Result<()> {
        let replicas = format!("--replicas={}", replicas);
        Self::kubectl(&["scale", "deploy", &replicas, name, "-n", namespace]).await?;
        Ok(())
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<()> {
        Self::kubectl(&["delete", "deployment", name, "-n", namespace]).await?;
        Ok(())
    }

    async fn delete_all_instances(&self, namespace: &str) -> Result<()> {
        Self::kubectl(&["delete", "--all", "pods", "-n", namespace]).await?;
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<String>> {
        let table = Self::kubectl(&["get", kind.resource(), "-n", namespace]).await?;
        Ok(parse::name_column(&table))
    }

    async fn get_object(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<Lookup<String>> {
        let output =
            Self::output("kubectl", &["get", kind.resource(), name, "-n", namespace, "-o", "yaml"]).await?;
        if output.status.success() {
            return Ok(Lookup::Found(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        if parse::is_not_found(&String::from_utf8_lossy(&output.stderr)) {
            return Ok(Lookup::NoneFound);
        }
        Err(command_failed("kubectl", &output))
    }

    async fn replace_object(&self, manifest: &Path) -> Result<ObjectApply> {
        Self::apply("replace", manifest).await
    }

    async fn create_object(&self, manifest: &Path) -> Result<ObjectApply> {
        Self::apply("create", manifest).await
    }

    async fn snapshot_cluster_state(&self, destination: &Path) -> Result<()> {
        let destination = destination.to_string_lossy();
        Self::checked("gravity", &["backup", &destination]).await?;
        Ok(())
    }

    async fn run_in_container(&self, container: &str, command: &str) -> Result<Vec<u8>> {
        let output = Self::output(
            "gravity",
            &["exec", "docker", "exec", "-i", container, "/bin/bash", "-c", command],
        )
        .await?;
        if !output.status.success() {
            return Err(AccordError::ContainerCommandFailed {
                container: container.to_string(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }

    async fn run_as_user(&self, user: &str, command: &str) -> Result<()> {
        Self::checked("su", &["-", user, "-c", command]).await?;
        Ok(())
    }

    async fn set_owner(&self, path: &Path, owner: &str, recursive: bool) -> Result<()> {
        let path = path.to_path_buf();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || chown_tree(&path, &owner, recursive))
            .await
            .map_err(|e| AccordError::Io(std::io::Error::other(e)))?
    }

    async fn relaunch_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        Err(AccordError::Unsupported(format!(
            "relaunching deployment {} requires the platform API, start it from the UI",
            record.name.as_deref().unwrap_or(&record.id)
        )))
    }
}
