//! Jobstore reconciliation decisions.
//!
//! Given the prior recorded status of a command and what is on disk, decide
//! whether its cactus jobstore is kept for `--restart` or wiped for a fresh
//! run. The filesystem side lives in [`crate::io::jobstore`].

use std::path::{Path, PathBuf};

use crate::core::path::resolve_path;
use crate::core::types::CommandStatus;

/// Marker file cactus writes once a jobstore is initialized.
pub const ROOT_MARKER: &str = "files/shared/rootJobStoreID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobstoreAction {
    /// Keep the jobstore and append `--restart`.
    Restart,
    Delete(DeleteReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    /// Prior attempt was interrupted but the jobstore was never initialized.
    MissingMarker,
    /// Prior attempt was interrupted, but an earlier step reruns first.
    NotFirstTarget,
    /// No interrupted attempt to resume.
    NothingToResume,
}

impl DeleteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingMarker => "root marker missing",
            Self::NotFirstTarget => "not the first rerun target",
            Self::NothingToResume => "no interrupted run to resume",
        }
    }
}

/// Decision table for an existing jobstore.
pub fn decide(prior: Option<CommandStatus>, first_rerun_target: bool, marker_present: bool) -> JobstoreAction {
    match prior {
        Some(status) if status.is_incomplete() => {
            if !first_rerun_target {
                JobstoreAction::Delete(DeleteReason::NotFirstTarget)
            } else if marker_present {
                JobstoreAction::Restart
            } else {
                JobstoreAction::Delete(DeleteReason::MissingMarker)
            }
        }
        _ => JobstoreAction::Delete(DeleteReason::NothingToResume),
    }
}

/// Resolve a jobstore locator, stripping a `file:` scheme prefix.
pub fn jobstore_path(locator: &str, base_dir: &Path) -> PathBuf {
    let raw = locator.trim();
    let raw = raw.strip_prefix("file:").unwrap_or(raw);
    resolve_path(raw, base_dir)
}

pub fn root_marker(jobstore: &Path) -> PathBuf {
    jobstore.join(ROOT_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_first_target_with_marker_restarts() {
        assert_eq!(decide(Some(CommandStatus::Failed), true, true), JobstoreAction::Restart);
        assert_eq!(decide(Some(CommandStatus::Running), true, true), JobstoreAction::Restart);
    }

    #[test]
    fn missing_marker_or_later_target_deletes() {
        assert_eq!(
            decide(Some(CommandStatus::Failed), true, false),
            JobstoreAction::Delete(DeleteReason::MissingMarker)
        );
        assert_eq!(
            decide(Some(CommandStatus::Running), false, true),
            JobstoreAction::Delete(DeleteReason::NotFirstTarget)
        );
    }

    #[test]
    fn success_or_no_entry_deletes() {
        assert_eq!(
            decide(Some(CommandStatus::Success), true, true),
            JobstoreAction::Delete(DeleteReason::NothingToResume)
        );
        assert_eq!(
            decide(None, true, true),
            JobstoreAction::Delete(DeleteReason::NothingToResume)
        );
    }

    #[test]
    fn file_prefix_is_stripped() {
        let base = Path::new("/work");
        assert_eq!(jobstore_path("file:js/blast", base), PathBuf::from("/work/js/blast"));
        assert_eq!(jobstore_path("/abs/js", base), PathBuf::from("/abs/js"));
        assert_eq!(
            root_marker(Path::new("/abs/js")),
            PathBuf::from("/abs/js/files/shared/rootJobStoreID")
        );
    }
}
