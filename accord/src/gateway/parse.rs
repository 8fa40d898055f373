//! Parsers for kubectl and shell tool output.

use super::{InstanceRecord, Lookup, ObjectApply};

fn is_header(line: &str) -> bool {
    line.split_whitespace().next() == Some("NAME") || line.starts_with("No resources found")
}

/// Parse a `kubectl get pods` table. Lines too short to carry a status are
/// skipped along with the header.
pub fn instance_table(output: &str) -> Vec<InstanceRecord> {
    output
        .lines()
        .filter(|line| !is_header(line))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let name = columns.next()?;
            let ready = columns.next()?;
            let status = columns.next()?;
            Some(InstanceRecord {
                name: name.to_string(),
                ready: ready.to_string(),
                status: status.to_string(),
            })
        })
        .collect()
}

/// First column of every row of a `kubectl get` table.
pub fn name_column(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !is_header(line))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Container id following `marker` on the first line that contains it,
/// e.g. `Container ID:  docker://3f2a...`.
pub fn container_id(description: &str, marker: &str) -> Lookup<String> {
    description
        .lines()
        .find_map(|line| line.split_once(marker))
        .map(|(_, id)| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .into()
}

/// Interpret a `kubectl replace|create -f` result.
pub fn object_apply(success: bool, stdout: &str, stderr: &str) -> ObjectApply {
    if success && (stdout.contains("replaced") || stdout.contains("created")) {
        return ObjectApply::Applied;
    }
    if stderr.contains("NotFound") || stderr.contains("not found") {
        return ObjectApply::NotFound;
    }
    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
    ObjectApply::Rejected(detail.trim().to_string())
}

/// Whether a failed `kubectl get` meant the object does not exist.
pub fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}
