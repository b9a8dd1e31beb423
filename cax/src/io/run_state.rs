//! Run state storage for resume bookkeeping (`<log_root>/run_state.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::command::{PlannedCommand, canonical_from_preview};
use crate::core::resume::{command_stable_key, prefix_skips, stable_key};
use crate::core::types::CommandStatus;
use crate::io::outputs::outputs_exist;

pub const STATE_FILE: &str = "run_state.json";

/// Persisted resume state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    #[serde(default)]
    pub plan_signature: String,
    /// Entries keyed by stable key.
    #[serde(default)]
    pub commands: BTreeMap<String, StateEntry>,
}

/// Last recorded outcome of one planned command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateEntry {
    pub index: usize,
    pub display_name: String,
    pub preview: String,
    pub canonical_preview: String,
    pub stable_key: String,
    pub log_path: Option<String>,
    pub status: Option<CommandStatus>,
    pub exit_code: Option<i32>,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
}

impl StateEntry {
    fn for_command(command: &PlannedCommand, index: usize, key: &str) -> Self {
        Self {
            index,
            display_name: command.display_name.clone(),
            preview: command.shell_preview(),
            canonical_preview: command.canonical_preview(),
            stable_key: key.to_string(),
            log_path: Some(command.log_path.display().to_string()),
            status: None,
            exit_code: None,
            updated_at: now_iso(),
            skipped: None,
        }
    }

    /// Key this entry matches, deriving one for entries written without it.
    fn resolved_key(&self) -> String {
        if !self.stable_key.is_empty() {
            return self.stable_key.clone();
        }
        let canonical = if self.canonical_preview.is_empty() {
            canonical_from_preview(&self.display_name, &self.preview)
        } else {
            self.canonical_preview.clone()
        };
        stable_key(&self.display_name, &canonical)
    }
}

pub fn state_path(log_root: &Path) -> PathBuf {
    log_root.join(STATE_FILE)
}

/// Load run state, returning `None` when the file is missing or unusable.
///
/// Entries are re-indexed by stable key; entries that are not JSON objects,
/// or whose fields cannot be read, are dropped.
pub fn load_run_state_file(path: &Path) -> Option<RunState> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            if path.exists() {
                warn!(path = %path.display(), error = %err, "unreadable run state ignored");
            }
            return None;
        }
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "corrupt run state ignored");
            return None;
        }
    };
    let Value::Object(mut root) = value else {
        warn!(path = %path.display(), "run state is not a JSON object; ignored");
        return None;
    };

    let plan_signature = root
        .get("plan_signature")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut commands = BTreeMap::new();
    if let Some(Value::Object(entries)) = root.remove("commands") {
        for (key, raw) in entries {
            if !raw.is_object() {
                debug!(key = %key, "non-object run state entry dropped");
                continue;
            }
            match serde_json::from_value::<StateEntry>(raw) {
                Ok(mut entry) => {
                    let stable = entry.resolved_key();
                    entry.stable_key.clone_from(&stable);
                    commands.insert(stable, entry);
                }
                Err(err) => debug!(key = %key, error = %err, "unreadable run state entry dropped"),
            }
        }
    }
    Some(RunState {
        plan_signature,
        commands,
    })
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), entries = state.commands.len(), "writing run state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}

/// Run state loaded at run start and flushed after every transition.
#[derive(Debug)]
pub struct RunStateStore {
    path: PathBuf,
    state: RunState,
    signature_mismatch: bool,
}

impl RunStateStore {
    /// Load any prior state, adopt `signature`, and persist immediately.
    pub fn open(path: &Path, signature: &str) -> Result<Self> {
        let prior = load_run_state_file(path).unwrap_or_default();
        let signature_mismatch =
            !prior.plan_signature.is_empty() && prior.plan_signature != signature;
        if signature_mismatch {
            warn!(path = %path.display(), "plan signature changed; matching commands individually");
        }
        let store = Self {
            path: path.to_path_buf(),
            state: RunState {
                plan_signature: signature.to_string(),
                commands: prior.commands,
            },
            signature_mismatch,
        };
        store.flush()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn signature_mismatch(&self) -> bool {
        self.signature_mismatch
    }

    pub fn entry(&self, command: &PlannedCommand) -> Option<&StateEntry> {
        self.state.commands.get(&command_stable_key(command))
    }

    pub fn prior_status(&self, command: &PlannedCommand) -> Option<CommandStatus> {
        self.entry(command).and_then(|entry| entry.status)
    }

    /// Leading commands that succeeded before and whose outputs still verify.
    pub fn compute_skips(&self, commands: &[PlannedCommand], base_dir: &Path) -> Vec<usize> {
        prefix_skips(commands, |command| {
            self.prior_status(command) == Some(CommandStatus::Success)
                && outputs_exist(command, base_dir)
        })
    }

    pub fn mark_running(&mut self, command: &PlannedCommand, index: usize) -> Result<()> {
        let key = command_stable_key(command);
        let mut entry = StateEntry::for_command(command, index, &key);
        entry.status = Some(CommandStatus::Running);
        self.state.commands.insert(key, entry);
        self.flush()
    }

    pub fn mark_result(
        &mut self,
        command: &PlannedCommand,
        index: usize,
        success: bool,
        exit_code: i32,
    ) -> Result<()> {
        let key = command_stable_key(command);
        let mut entry = StateEntry::for_command(command, index, &key);
        entry.status = Some(if success {
            CommandStatus::Success
        } else {
            CommandStatus::Failed
        });
        entry.exit_code = Some(exit_code);
        self.state.commands.insert(key, entry);
        self.flush()
    }

    /// Record a resume skip, carrying the prior status and exit code forward.
    pub fn mark_skipped(&mut self, command: &PlannedCommand, index: usize) -> Result<()> {
        let key = command_stable_key(command);
        let prior = self.state.commands.get(&key);
        let status = prior
            .and_then(|e| e.status)
            .unwrap_or(CommandStatus::Success);
        let exit_code = prior.and_then(|e| e.exit_code);
        let mut entry = StateEntry::for_command(command, index, &key);
        entry.status = Some(status);
        entry.exit_code = exit_code;
        entry.skipped = Some(true);
        self.state.commands.insert(key, entry);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        write_run_state(&self.path, &self.state)
    }
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::planned;

    #[test]
    fn open_persists_immediately_and_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = state_path(&temp.path().join("logs"));
        let cmd = planned("step-a", &["echo", "a"]);

        let mut store = RunStateStore::open(&path, "sig-1").expect("open");
        assert!(path.exists());
        store.mark_running(&cmd, 0).expect("running");
        assert_eq!(store.prior_status(&cmd), Some(CommandStatus::Running));
        store.mark_result(&cmd, 0, true, 0).expect("result");

        let loaded = load_run_state_file(&path).expect("state");
        assert_eq!(loaded.plan_signature, "sig-1");
        let entry = loaded
            .commands
            .get(&command_stable_key(&cmd))
            .expect("entry");
        assert_eq!(entry.status, Some(CommandStatus::Success));
        assert_eq!(entry.exit_code, Some(0));
        assert_eq!(entry.preview, "echo a");
        assert!(!temp.path().join("logs/run_state.json.tmp").exists());
    }

    #[test]
    fn signature_mismatch_is_flagged_but_entries_survive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(STATE_FILE);
        let cmd = planned("step-a", &["echo", "a"]);
        {
            let mut store = RunStateStore::open(&path, "old").expect("open");
            store.mark_result(&cmd, 0, true, 0).expect("result");
        }
        let store = RunStateStore::open(&path, "new").expect("reopen");
        assert!(store.signature_mismatch());
        assert_eq!(store.prior_status(&cmd), Some(CommandStatus::Success));
    }

    #[test]
    fn corrupt_state_is_treated_as_absent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(STATE_FILE);
        fs::write(&path, "{not json").expect("write");
        assert!(load_run_state_file(&path).is_none());

        let store = RunStateStore::open(&path, "sig").expect("open");
        assert!(!store.signature_mismatch());
        assert!(store.state().commands.is_empty());
    }

    #[test]
    fn legacy_entries_are_rekeyed_and_junk_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(STATE_FILE);
        let cmd = planned("align-Anc0", &["cactus-align", "js", "seq.txt", "Anc0.hal"]);
        let legacy = serde_json::json!({
            "plan_signature": "abc",
            "commands": {
                "0": {
                    "index": 0,
                    "display_name": "align-Anc0",
                    "preview": "cactus-align js seq.txt Anc0.hal --maxCores 8",
                    "status": "success",
                    "exit_code": 0
                },
                "1": "not an object",
                "2": {"display_name": "x", "status": "exploded"}
            }
        });
        fs::write(&path, legacy.to_string()).expect("write");

        let loaded = load_run_state_file(&path).expect("state");
        assert_eq!(loaded.commands.len(), 1);
        let key = command_stable_key(&cmd);
        assert_eq!(
            loaded.commands.get(&key).map(|e| e.stable_key.as_str()),
            Some(key.as_str())
        );
    }

    #[test]
    fn legacy_ramax_entry_with_custom_executable_matches_live_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(STATE_FILE);
        let mut cmd = planned("RaMAx-Anc0", &["ramax-dev", "-i", "seq.txt", "-o", "Anc0.hal"]);
        cmd.is_ramax = true;
        let legacy = serde_json::json!({
            "commands": {
                "0": {
                    "display_name": "RaMAx-Anc0",
                    "preview": "ramax-dev -i seq.txt -o Anc0.hal --threads 16",
                    "status": "success",
                    "exit_code": 0
                }
            }
        });
        fs::write(&path, legacy.to_string()).expect("write");

        let store = RunStateStore::open(&path, "sig").expect("open");
        assert_eq!(store.prior_status(&cmd), Some(CommandStatus::Success));
    }

    #[test]
    fn skipped_entry_keeps_prior_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(STATE_FILE);
        let cmd = planned("step-a", &["echo", "a"]);
        let mut store = RunStateStore::open(&path, "sig").expect("open");
        store.mark_result(&cmd, 0, true, 0).expect("result");
        store.mark_skipped(&cmd, 0).expect("skip");

        let entry = store.entry(&cmd).expect("entry");
        assert_eq!(entry.status, Some(CommandStatus::Success));
        assert_eq!(entry.exit_code, Some(0));
        assert_eq!(entry.skipped, Some(true));
    }

    #[test]
    fn skips_stop_at_missing_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(STATE_FILE);
        let first = planned("a", &["echo", "a"]);
        let mut second = planned("b", &["echo", "b"]);
        second.outputs = vec![temp.path().join("missing.hal")];
        let third = planned("c", &["echo", "c"]);
        let commands = vec![first, second, third];

        let mut store = RunStateStore::open(&path, "sig").expect("open");
        for (idx, cmd) in commands.iter().enumerate() {
            store.mark_result(cmd, idx, true, 0).expect("result");
        }
        assert_eq!(store.compute_skips(&commands, temp.path()), vec![0]);
    }
}
