//! Read-only resume report: `cax status`.
//!
//! Answers what the next `cax run` would skip and rerun, and why, without
//! touching the run state file or any jobstore.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::command::PlannedCommand;
use crate::core::path::log_root;
use crate::core::resume::{command_stable_key, plan_signature, prefix_skips};
use crate::core::types::CommandStatus;
use crate::io::config::RunSettings;
use crate::io::outputs::outputs_exist;
use crate::io::run_state::{RunState, StateEntry, load_run_state_file, state_path};
use crate::plan::Plan;
use crate::run::plan_commands;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePreview {
    pub plan_matches: bool,
    pub skipped: Vec<usize>,
    pub completed: Vec<String>,
    pub pending: Vec<String>,
    pub failed: Vec<String>,
    pub missing_outputs: Vec<String>,
    pub total: usize,
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowStatus {
    Pending,
    Completed,
    Rerun,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pending => "Pending",
            Self::Completed => "Completed",
            Self::Rerun => "Rerun",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRow {
    pub index: usize,
    pub name: String,
    pub status: RowStatus,
    pub note: String,
}

struct Snapshot {
    commands: Vec<PlannedCommand>,
    state: Option<RunState>,
    skipped: HashSet<usize>,
    state_path: PathBuf,
}

impl Snapshot {
    fn take(plan: &Plan, base_dir: &Path, settings: &RunSettings) -> Self {
        let commands = plan_commands(plan, base_dir, settings);
        let state_path = state_path(&log_root(plan, base_dir));
        let state = load_run_state_file(&state_path);
        let skipped = match &state {
            Some(state) => prefix_skips(&commands, |command| {
                entry(state, command).and_then(|e| e.status) == Some(CommandStatus::Success)
                    && outputs_exist(command, base_dir)
            })
            .into_iter()
            .collect(),
            None => HashSet::new(),
        };
        Self {
            commands,
            state,
            skipped,
            state_path,
        }
    }

    fn entry(&self, command: &PlannedCommand) -> Option<&StateEntry> {
        entry(self.state.as_ref()?, command)
    }
}

fn entry<'a>(state: &'a RunState, command: &PlannedCommand) -> Option<&'a StateEntry> {
    state.commands.get(&command_stable_key(command))
}

/// Summary of a resumed run, or `None` when no run state exists yet.
pub fn preview_resume(plan: &Plan, base_dir: &Path, settings: &RunSettings) -> Option<ResumePreview> {
    let snapshot = Snapshot::take(plan, base_dir, settings);
    let state = snapshot.state.as_ref()?;
    let signature = plan_signature(&snapshot.commands, base_dir, settings.thread_count);

    let mut preview = ResumePreview {
        plan_matches: state.plan_signature == signature,
        skipped: Vec::new(),
        completed: Vec::new(),
        pending: Vec::new(),
        failed: Vec::new(),
        missing_outputs: Vec::new(),
        total: snapshot.commands.len(),
        state_path: snapshot.state_path.clone(),
    };
    for (index, command) in snapshot.commands.iter().enumerate() {
        let name = command.display_name.clone();
        if snapshot.skipped.contains(&index) {
            preview.skipped.push(index);
            preview.completed.push(name);
            continue;
        }
        match snapshot.entry(command).and_then(|e| e.status) {
            Some(CommandStatus::Success) if !outputs_exist(command, base_dir) => {
                preview.missing_outputs.push(name.clone());
            }
            Some(CommandStatus::Failed) => preview.failed.push(name.clone()),
            _ => {}
        }
        preview.pending.push(name);
    }
    Some(preview)
}

/// Per-command status rows in execution order.
pub fn command_rows(plan: &Plan, base_dir: &Path, settings: &RunSettings) -> Vec<CommandRow> {
    let snapshot = Snapshot::take(plan, base_dir, settings);
    snapshot
        .commands
        .iter()
        .enumerate()
        .map(|(index, command)| {
            let (status, note) = if snapshot.skipped.contains(&index) {
                (RowStatus::Completed, "Will be skipped (succeeded and outputs exist)".to_string())
            } else if let Some(entry) = snapshot.entry(command) {
                (RowStatus::Rerun, rerun_note(entry, outputs_exist(command, base_dir)))
            } else if outputs_exist(command, base_dir) {
                (RowStatus::Pending, "Outputs exist (no recorded success)".to_string())
            } else {
                (RowStatus::Pending, String::new())
            };
            CommandRow {
                index,
                name: command.display_name.clone(),
                status,
                note,
            }
        })
        .collect()
}

fn rerun_note(entry: &StateEntry, outputs_ok: bool) -> String {
    match entry.status {
        Some(CommandStatus::Success) if outputs_ok => {
            "Previously succeeded, but an earlier step will rerun".to_string()
        }
        Some(CommandStatus::Success) => "Outputs missing or inconsistent; will rerun".to_string(),
        Some(CommandStatus::Failed) => match entry.exit_code {
            Some(code) => format!("Failed last run (exit {code}); will rerun"),
            None => "Failed last run; will rerun".to_string(),
        },
        Some(CommandStatus::Running) => "Interrupted/terminated last run; will rerun".to_string(),
        None => "Will rerun".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(status: Option<CommandStatus>, exit_code: Option<i32>) -> StateEntry {
        StateEntry {
            status,
            exit_code,
            ..StateEntry::default()
        }
    }

    #[test]
    fn rerun_notes_explain_the_prior_outcome() {
        assert_eq!(
            rerun_note(&entry_with(Some(CommandStatus::Success), Some(0)), true),
            "Previously succeeded, but an earlier step will rerun"
        );
        assert_eq!(
            rerun_note(&entry_with(Some(CommandStatus::Success), Some(0)), false),
            "Outputs missing or inconsistent; will rerun"
        );
        assert_eq!(
            rerun_note(&entry_with(Some(CommandStatus::Failed), Some(3)), false),
            "Failed last run (exit 3); will rerun"
        );
        assert_eq!(
            rerun_note(&entry_with(Some(CommandStatus::Running), None), false),
            "Interrupted/terminated last run; will rerun"
        );
        assert_eq!(rerun_note(&entry_with(None, None), false), "Will rerun");
    }

    #[test]
    fn row_status_displays_titles() {
        assert_eq!(RowStatus::Completed.to_string(), "Completed");
        assert_eq!(RowStatus::Rerun.to_string(), "Rerun");
    }
}
