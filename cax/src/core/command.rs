//! Planned commands and the argv helpers shared by the planner and resume engine.

use std::path::{Path, PathBuf};

use crate::plan::{Step, StepKind};

/// Flag carrying the cactus thread override.
pub const CACTUS_THREADS_FLAG: &str = "--maxCores";
/// Flag carrying the RaMAx thread override.
pub const RAMAX_THREADS_FLAG: &str = "--threads";
/// Switch asking cactus to resume from an existing jobstore.
pub const RESTART_SWITCH: &str = "--restart";

/// A concrete external invocation. Rebuilt on every planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub args: Vec<String>,
    pub category: StepKind,
    pub display_name: String,
    pub log_path: PathBuf,
    pub workdir: Option<PathBuf>,
    pub round_name: Option<String>,
    /// Source step. `None` for generated RaMAx invocations.
    pub step: Option<Step>,
    pub is_ramax: bool,
    /// Cactus commands to run if this RaMAx invocation fails.
    pub fallback: Vec<PlannedCommand>,
    /// Declared outputs resolved against the base directory.
    pub outputs: Vec<PathBuf>,
}

/// Which argv rewrites apply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFamily {
    Cactus,
    Ramax,
    Other,
}

impl PlannedCommand {
    pub fn executable(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// File name of the executable, e.g. `cactus-blast`.
    pub fn program_name(&self) -> Option<&str> {
        let exe = self.executable()?;
        Path::new(exe).file_name().and_then(|name| name.to_str())
    }

    pub fn tool_family(&self) -> ToolFamily {
        tool_family(&self.args, self.is_ramax)
    }

    /// Quoted, copy-pasteable command line.
    pub fn shell_preview(&self) -> String {
        shell_join(&self.args)
    }

    /// Preview with thread/restart tuning removed, used for resume matching.
    pub fn canonical_preview(&self) -> String {
        shell_join(&canonical_args(&self.args, self.is_ramax))
    }

    pub fn jobstore(&self) -> Option<&str> {
        self.step
            .as_ref()
            .and_then(|step| step.jobstore.as_deref())
            .filter(|js| !js.trim().is_empty())
    }
}

pub fn tool_family(args: &[String], is_ramax: bool) -> ToolFamily {
    let name = args
        .first()
        .and_then(|exe| Path::new(exe).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if is_ramax || name.eq_ignore_ascii_case("ramax") {
        ToolFamily::Ramax
    } else if name.to_ascii_lowercase().starts_with("cactus") {
        ToolFamily::Cactus
    } else {
        ToolFamily::Other
    }
}

/// Drop `--maxCores`/`--restart` from cactus argv and `--threads` from RaMAx.
pub fn canonical_args(args: &[String], is_ramax: bool) -> Vec<String> {
    match tool_family(args, is_ramax) {
        ToolFamily::Cactus => strip_switch(&strip_flag(args, CACTUS_THREADS_FLAG), RESTART_SWITCH),
        ToolFamily::Ramax => strip_flag(args, RAMAX_THREADS_FLAG),
        ToolFamily::Other => args.to_vec(),
    }
}

/// Display name prefix of RaMAx substitution commands.
pub const RAMAX_DISPLAY_PREFIX: &str = "RaMAx-";

/// Canonical form of a previously recorded shell preview.
///
/// RaMAx commands are recognised by display name as well as executable, so a
/// configured executable name still has its `--threads` stripped.
pub fn canonical_from_preview(display_name: &str, preview: &str) -> String {
    let is_ramax = display_name.starts_with(RAMAX_DISPLAY_PREFIX);
    match shlex::split(preview) {
        Some(tokens) => shell_join(&canonical_args(&tokens, is_ramax)),
        None => preview.to_string(),
    }
}

/// POSIX shell split; unbalanced quotes fall back to whitespace splitting.
pub fn split_command(raw: &str) -> Vec<String> {
    shlex::split(raw)
        .unwrap_or_else(|| raw.split_whitespace().map(str::to_string).collect())
}

pub fn shell_join(args: &[String]) -> String {
    shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
}

/// True when `flag` appears as its own token or as `flag=value`.
pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| is_flag_token(arg, flag))
}

fn is_flag_token(arg: &str, flag: &str) -> bool {
    arg == flag
        || arg
            .strip_prefix(flag)
            .is_some_and(|rest| rest.starts_with('='))
}

/// Remove `flag value` pairs and `flag=value` tokens.
pub fn strip_flag(args: &[String], flag: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            iter.next();
            continue;
        }
        if is_flag_token(arg, flag) {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

/// Remove a value-less switch, including a stray `switch=value` spelling.
pub fn strip_switch(args: &[String], switch: &str) -> Vec<String> {
    args.iter()
        .filter(|arg| !is_flag_token(arg, switch))
        .cloned()
        .collect()
}

/// Turn `hal2fasta … > out.fa` into `hal2fasta … --outFaPath out.fa`.
///
/// Everything from the redirect on is replaced; earlier `--outFaPath` pairs
/// are dropped so the flag appears once.
pub fn normalize_hal2fasta(args: Vec<String>) -> Vec<String> {
    let Some(redirect) = args.iter().position(|arg| arg == ">" || arg == ">>") else {
        return args;
    };
    let out_path = args.get(redirect + 1).cloned();
    let mut cleaned = strip_flag(&args[..redirect], "--outFaPath");
    if let Some(path) = out_path {
        cleaned.push("--outFaPath".to_string());
        cleaned.push(path);
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn command(argv: &[&str], is_ramax: bool) -> PlannedCommand {
        PlannedCommand {
            args: args(argv),
            category: StepKind::Other,
            display_name: "cmd".to_string(),
            log_path: PathBuf::from("/tmp/cmd.log"),
            workdir: None,
            round_name: None,
            step: None,
            is_ramax,
            fallback: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn split_handles_quotes_and_unbalanced_input() {
        assert_eq!(
            split_command("cactus-align js 'my seq.txt' out.hal"),
            args(&["cactus-align", "js", "my seq.txt", "out.hal"])
        );
        assert_eq!(
            split_command("echo 'unterminated here"),
            args(&["echo", "'unterminated", "here"])
        );
    }

    #[test]
    fn join_quotes_when_needed() {
        let joined = shell_join(&args(&["hal2fasta", "my file.hal", "Anc0"]));
        assert_eq!(split_command(&joined), args(&["hal2fasta", "my file.hal", "Anc0"]));
        assert_eq!(shell_join(&args(&["ls", "-l"])), "ls -l");
    }

    #[test]
    fn flags_match_bare_and_assigned_forms() {
        let argv = args(&["cactus", "--maxCores=8", "--restart"]);
        assert!(has_flag(&argv, "--maxCores"));
        assert!(has_flag(&argv, "--restart"));
        assert!(!has_flag(&argv, "--max"));
        assert!(!has_flag(&args(&["cactus", "--maxCoresX"]), "--maxCores"));
    }

    #[test]
    fn canonical_preview_ignores_thread_and_restart_tuning() {
        let plain = command(&["cactus-blast", "js", "seq.txt", "out.paf"], false);
        let tuned = command(
            &["/opt/bin/cactus-blast", "js", "seq.txt", "out.paf", "--maxCores", "16", "--restart"],
            false,
        );
        let mut tuned_plain = tuned.clone();
        tuned_plain.args[0] = "cactus-blast".to_string();
        assert_eq!(plain.canonical_preview(), tuned_plain.canonical_preview());
        assert_eq!(tuned.tool_family(), ToolFamily::Cactus);

        let ramax = command(&["ramax", "-i", "seq.txt", "--threads=4"], true);
        assert_eq!(ramax.canonical_preview(), "ramax -i seq.txt");

        let other = command(&["halAppendSubtree", "--threads", "2"], false);
        assert_eq!(other.canonical_preview(), "halAppendSubtree --threads 2");
    }

    #[test]
    fn legacy_preview_canonicalizes_like_live_commands() {
        let live = command(&["cactus-align", "js", "seq.txt", "--maxCores", "4"], false);
        assert_eq!(
            canonical_from_preview("align-Anc0", "cactus-align js seq.txt --maxCores 4 --restart"),
            live.canonical_preview()
        );
        assert_eq!(canonical_from_preview("odd", "echo 'open"), "echo 'open");
    }

    #[test]
    fn legacy_ramax_preview_with_custom_executable_drops_threads() {
        let live = command(&["/opt/bin/ramax-2.1", "-i", "seq.txt", "--threads", "8"], true);
        assert_eq!(
            canonical_from_preview("RaMAx-Anc0", "/opt/bin/ramax-2.1 -i seq.txt --threads 8"),
            live.canonical_preview()
        );
        assert_eq!(
            canonical_from_preview("custom-Anc0", "/opt/bin/ramax-2.1 -i seq.txt --threads 8"),
            "/opt/bin/ramax-2.1 -i seq.txt --threads 8"
        );
    }

    #[test]
    fn ramax_family_by_flag_or_name() {
        assert_eq!(command(&["RaMAx", "-i", "x"], false).tool_family(), ToolFamily::Ramax);
        assert_eq!(command(&["custom-aligner"], true).tool_family(), ToolFamily::Ramax);
        assert_eq!(command(&["hal2fasta"], false).tool_family(), ToolFamily::Other);
    }

    #[test]
    fn hal2fasta_redirect_becomes_out_fa_path() {
        let normalized = normalize_hal2fasta(args(&[
            "hal2fasta", "in.hal", "Anc0", "--outFaPath", "old.fa", "--hdf5InMemory", ">", "Anc0.fa",
        ]));
        assert_eq!(
            normalized,
            args(&["hal2fasta", "in.hal", "Anc0", "--hdf5InMemory", "--outFaPath", "Anc0.fa"])
        );

        let appended = normalize_hal2fasta(args(&["hal2fasta", "in.hal", "Anc0", ">>", "a.fa"]));
        assert_eq!(
            appended,
            args(&["hal2fasta", "in.hal", "Anc0", "--outFaPath", "a.fa"])
        );

        let untouched = args(&["hal2fasta", "in.hal", "Anc0", "--outFaPath", "x.fa"]);
        assert_eq!(normalize_hal2fasta(untouched.clone()), untouched);
    }
}
