//! Resume keys and the contiguous-prefix skip rule.
//!
//! Everything here is pure; the persisted state and output checks live in
//! [`crate::io::run_state`] and [`crate::io::outputs`].

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::core::command::PlannedCommand;

/// Hex sha256 of `display_name`, a NUL byte, and the canonical preview.
pub fn stable_key(display_name: &str, canonical_preview: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(display_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_preview.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cross-run identity of a planned command. Ignores thread and restart flags.
pub fn command_stable_key(command: &PlannedCommand) -> String {
    stable_key(&command.display_name, &command.canonical_preview())
}

/// Fingerprint of a planning pass. A mismatch is reported but never forces a
/// rerun on its own.
pub fn plan_signature(commands: &[PlannedCommand], base_dir: &Path, thread_count: Option<u32>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_dir.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(thread_count.map(|n| n.to_string()).unwrap_or_default().as_bytes());
    for command in commands {
        hasher.update(b"\n");
        hasher.update(command.canonical_preview().as_bytes());
        hasher.update([0u8]);
        if let Some(workdir) = &command.workdir {
            hasher.update(workdir.to_string_lossy().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Indices of the longest leading run of commands for which `is_complete`
/// holds. Scanning stops at the first incomplete command so later steps that
/// depend on its artifacts rerun as well.
pub fn prefix_skips<F>(commands: &[PlannedCommand], mut is_complete: F) -> Vec<usize>
where
    F: FnMut(&PlannedCommand) -> bool,
{
    commands
        .iter()
        .take_while(|command| is_complete(*command))
        .enumerate()
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_support::planned;

    #[test]
    fn stable_key_ignores_thread_flags() {
        let plain = planned("blast-Anc0", &["cactus-blast", "js", "seq.txt", "Anc0.paf"]);
        let mut tuned = plain.clone();
        tuned.args.extend(["--maxCores".to_string(), "32".to_string()]);
        tuned.args.push("--restart".to_string());
        assert_eq!(command_stable_key(&plain), command_stable_key(&tuned));

        let mut renamed = plain.clone();
        renamed.display_name = "blast-Anc1".to_string();
        assert_ne!(command_stable_key(&plain), command_stable_key(&renamed));
    }

    #[test]
    fn stable_key_separates_name_from_preview() {
        assert_ne!(stable_key("ab", "c"), stable_key("a", "bc"));
        assert_eq!(stable_key("a", "b").len(), 64);
    }

    #[test]
    fn signature_tracks_threads_and_workdirs() {
        let mut cmd = planned("RaMAx-Anc0", &["ramax", "-i", "seq.txt"]);
        cmd.is_ramax = true;
        let base = Path::new("/work");
        let commands = vec![cmd.clone()];

        let plain = plan_signature(&commands, base, None);
        assert_eq!(plain, plan_signature(&commands, base, None));
        assert_ne!(plain, plan_signature(&commands, base, Some(4)));
        assert_ne!(plain, plan_signature(&commands, Path::new("/other"), None));

        cmd.workdir = Some(PathBuf::from("/work/tmp"));
        assert_ne!(plain, plan_signature(&[cmd], base, None));
    }

    #[test]
    fn prefix_stops_at_first_incomplete_command() {
        let commands: Vec<PlannedCommand> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| planned(name, &["echo", *name]))
            .collect();

        let skips = prefix_skips(&commands, |cmd| cmd.display_name != "b");
        assert_eq!(skips, vec![0]);

        let all = prefix_skips(&commands, |_| true);
        assert_eq!(all, vec![0, 1, 2, 3]);

        let none = prefix_skips(&commands, |cmd| cmd.display_name != "a");
        assert!(none.is_empty());
    }
}
