//! Apply jobstore decisions on disk before a command launches.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::core::command::{PlannedCommand, RESTART_SWITCH, has_flag};
use crate::core::jobstore::{JobstoreAction, decide, jobstore_path, root_marker};
use crate::core::types::CommandStatus;

/// Keep (with `--restart`) or wipe the command's existing jobstore.
///
/// Returns `None` when the command declares no jobstore or it does not exist.
/// Deletion failures are logged and the command still runs.
pub fn reconcile_jobstore(
    command: &mut PlannedCommand,
    prior: Option<CommandStatus>,
    first_rerun_target: bool,
    base_dir: &Path,
) -> Option<JobstoreAction> {
    let path = jobstore_path(command.jobstore()?, base_dir);
    if !path.exists() {
        return None;
    }
    let marker = root_marker(&path).is_file();
    let action = decide(prior, first_rerun_target, marker);
    match action {
        JobstoreAction::Restart => {
            if !has_flag(&command.args, RESTART_SWITCH) {
                command.args.push(RESTART_SWITCH.to_string());
            }
            info!(command = %command.display_name, jobstore = %path.display(), "resuming jobstore with --restart");
        }
        JobstoreAction::Delete(reason) => {
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => info!(
                    command = %command.display_name,
                    jobstore = %path.display(),
                    reason = reason.as_str(),
                    "removed stale jobstore"
                ),
                Err(err) => warn!(
                    command = %command.display_name,
                    jobstore = %path.display(),
                    err = %err,
                    "failed to remove jobstore"
                ),
            }
        }
    }
    Some(action)
}
