//! Command lines for work on the sync node. They are run through
//! [`Gateway::run_as_user`](super::Gateway::run_as_user) so the sync user's
//! SSH keys are used.

use std::path::Path;

/// `sudo <command>` on `node` over ssh.
pub fn ssh_sudo(user: &str, node: &str, command: &str) -> String {
    format!("/bin/ssh -t -q {user}@{node} 'sudo {command}'")
}

/// Mirror the contents of `source` into the same path on `node`.
pub fn rsync_mirror(source: &Path, user: &str, node: &str) -> String {
    let path = source.display();
    format!("rsync -avrq {path}/ {user}@{node}:{path}")
}
