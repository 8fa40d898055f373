//! Scriptable in-memory gateway for tests.

use crate::gateway::{DeploymentRecord, Gateway, InstanceRecord, Lookup, ObjectApply, ObjectKind};
use crate::utils::{AccordError, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    /// Successive instance listings; the last one repeats
    listings: VecDeque<Vec<InstanceRecord>>,
    containers: HashMap<String, String>,
    deployments: Vec<String>,
    objects: HashMap<(&'static str, String), String>,
    extra_secrets: Vec<String>,
    /// Manifest file name -> scripted replace/create answers
    replace: HashMap<String, ObjectApply>,
    create: HashMap<String, ObjectApply>,
    /// Command substring -> stdout
    container_output: Vec<(String, Vec<u8>)>,
    /// Command substring -> file written as a side effect
    container_files: Vec<(String, PathBuf)>,
    fail_user_commands: bool,
    fail_relaunch: bool,
    calls: Vec<String>,
    user_commands: Vec<String>,
    container_commands: Vec<String>,
    owners: Vec<(PathBuf, String, bool)>,
    relaunched: Vec<String>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

fn records(instances: &[(&str, &str)]) -> Vec<InstanceRecord> {
    instances
        .iter()
        .map(|(name, status)| InstanceRecord {
            name: name.to_string(),
            ready: "1/1".to_string(),
            status: status.to_string(),
        })
        .collect()
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_instances(self, instances: &[(&str, &str)]) -> Self {
        self.with(|s| s.listings = VecDeque::from([records(instances)]))
    }

    /// Listings returned one per call, the last repeating.
    pub fn with_listing_sequence(self, listings: &[&[(&str, &str)]]) -> Self {
        self.with(|s| s.listings = listings.iter().map(|l| records(l)).collect())
    }

    pub fn with_container(self, instance: &str, id: &str) -> Self {
        self.with(|s| {
            s.containers.insert(instance.to_string(), id.to_string());
        })
    }

    pub fn with_deployments(self, names: &[&str]) -> Self {
        self.with(|s| s.deployments = names.iter().map(|n| n.to_string()).collect())
    }

    pub fn with_object(self, kind: ObjectKind, name: &str, yaml: &str) -> Self {
        self.with(|s| {
            s.objects.insert((kind.resource(), name.to_string()), yaml.to_string());
        })
    }

    /// Secret listed by the cluster in addition to the exported objects.
    pub fn with_listed_secret(self, name: &str) -> Self {
        self.with(|s| s.extra_secrets.push(name.to_string()))
    }

    pub fn with_replace(self, file_name: &str, outcome: ObjectApply) -> Self {
        self.with(|s| {
            s.replace.insert(file_name.to_string(), outcome);
        })
    }

    pub fn with_create(self, file_name: &str, outcome: ObjectApply) -> Self {
        self.with(|s| {
            s.create.insert(file_name.to_string(), outcome);
        })
    }

    pub fn with_container_output(self, command_contains: &str, stdout: &str) -> Self {
        self.with(|s| {
            s.container_output
                .push((command_contains.to_string(), stdout.as_bytes().to_vec()))
        })
    }

    /// When a container command contains `command_contains`, write `file`.
    pub fn with_container_file(self, command_contains: &str, file: &Path) -> Self {
        self.with(|s| {
            s.container_files
                .push((command_contains.to_string(), file.to_path_buf()))
        })
    }

    pub fn fail_user_commands(self) -> Self {
        self.with(|s| s.fail_user_commands = true)
    }

    pub fn fail_relaunch(self) -> Self {
        self.with(|s| s.fail_relaunch = true)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn user_commands(&self) -> Vec<String> {
        self.state.lock().unwrap().user_commands.clone()
    }

    pub fn container_commands(&self) -> Vec<String> {
        self.state.lock().unwrap().container_commands.clone()
    }

    pub fn owners(&self) -> Vec<(PathBuf, String, bool)> {
        self.state.lock().unwrap().owners.clone()
    }

    pub fn relaunched(&self) -> Vec<String> {
        self.state.lock().unwrap().relaunched.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn manifest_name(manifest: &Path) -> String {
        manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Gateway for FakeGateway {
    async fn list_instances(&self, namespace: &str) -> Result<Vec<InstanceRecord>> {
        self.record(format!("list_instances {namespace}"));
        let mut state = self.state.lock().unwrap();
        let listing = if state.listings.len() > 1 {
            state.listings.pop_front().unwrap_or_default()
        } else {
            state.listings.front().cloned().unwrap_or_default()
        };
        Ok(listing)
    }

    async fn container_id(&self, instance: &str, _namespace: &str) -> Result<Lookup<String>> {
        self.record(format!("container_id {instance}"));
        Ok(self.state.lock().unwrap().containers.get(instance).cloned().into())
    }

    async fn list_deployments(&self, _namespace: &str) -> Result<Vec<String>> {
        self.record("list_deployments".to_string());
        Ok(self.state.lock().unwrap().deployments.clone())
    }

    async fn scale_deployment(&self, name: &str, _namespace: &str, replicas: u32) -> Result<()> {
        self.record(format!("scale {name} {replicas}"));
        Ok(())
    }

    async fn delete_deployment(&self, name: &str, _namespace: &str) -> Result<()> {
        self.record(format!("delete_deployment {name}"));
        Ok(())
    }

    async fn delete_all_instances(&self, namespace: &str) -> Result<()> {
        self.record(format!("delete_all_instances {namespace}"));
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind, _namespace: &str) -> Result<Vec<String>> {
        self.record(format!("list_objects {}", kind.resource()));
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .objects
            .keys()
            .filter(|(k, _)| *k == kind.resource())
            .map(|(_, name)| name.clone())
            .collect();
        if kind == ObjectKind::Secret {
            names.extend(state.extra_secrets.iter().cloned());
        }
        names.sort();
        Ok(names)
    }

    async fn get_object(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<Lookup<String>> {
        self.record(format!("get_object {} {name} {namespace}", kind.resource()));
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&(kind.resource(), name.to_string()))
            .cloned()
            .into())
    }

    async fn replace_object(&self, manifest: &Path) -> Result<ObjectApply> {
        let name = Self::manifest_name(manifest);
        self.record(format!("replace {name}"));
        Ok(self.state.lock().unwrap().replace.get(&name).cloned().unwrap_or(ObjectApply::Applied))
    }

    async fn create_object(&self, manifest: &Path) -> Result<ObjectApply> {
        let name = Self::manifest_name(manifest);
        self.record(format!("create {name}"));
        Ok(self.state.lock().unwrap().create.get(&name).cloned().unwrap_or(ObjectApply::Applied))
    }

    async fn snapshot_cluster_state(&self, destination: &Path) -> Result<()> {
        self.record(format!("snapshot_cluster_state {}", destination.display()));
        std::fs::write(destination, b"cluster state")?;
        Ok(())
    }

    async fn run_in_container(&self, container: &str, command: &str) -> Result<Vec<u8>> {
        self.record(format!("run_in_container {container}"));
        let mut state = self.state.lock().unwrap();
        state.container_commands.push(command.to_string());

        for (needle, file) in &state.container_files {
            if command.contains(needle.as_str()) {
                std::fs::write(file, b"-- dump")?;
            }
        }
        let output = state
            .container_output
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(output)
    }

    async fn run_as_user(&self, user: &str, command: &str) -> Result<()> {
        self.record(format!("run_as_user {user}"));
        let mut state = self.state.lock().unwrap();
        state.user_commands.push(command.to_string());
        if state.fail_user_commands {
            return Err(AccordError::CommandFailed {
                program: "su".to_string(),
                status: "exit status: 255".to_string(),
                stderr: "ssh: Could not resolve hostname".to_string(),
            });
        }
        Ok(())
    }

    async fn set_owner(&self, path: &Path, owner: &str, recursive: bool) -> Result<()> {
        self.record(format!("set_owner {} {owner}", path.display()));
        self.state
            .lock()
            .unwrap()
            .owners
            .push((path.to_path_buf(), owner.to_string(), recursive));
        Ok(())
    }

    async fn relaunch_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        self.record(format!("relaunch {}", record.id));
        let mut state = self.state.lock().unwrap();
        if state.fail_relaunch {
            return Err(AccordError::Unsupported("relaunch".to_string()));
        }
        state.relaunched.push(record.id.clone());
        Ok(())
    }
}
