//! Run orchestration: `cax run`.
//!
//! Plans the commands, skips the already-verified prefix, reconciles
//! jobstores, then executes the rest sequentially. The first failing command
//! aborts the run with a [`StepFailure`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::core::command::PlannedCommand;
use crate::core::path::log_root;
use crate::core::planner::{PlannerOptions, build_execution_plan};
use crate::core::resume::plan_signature;
use crate::error::StepFailure;
use crate::io::config::RunSettings;
use crate::io::jobstore::reconcile_jobstore;
use crate::io::logs::{MasterLog, StepLog};
use crate::io::process::{LaunchRequest, Launcher, SubprocessLauncher};
use crate::io::run_state::{RunStateStore, state_path};
use crate::io::telemetry::format_bytes;
use crate::io::tree_source::load_alignment_tree;
use crate::plan::Plan;

static IMPORTANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error|failed|exception|critical").expect("important-line pattern is valid")
});

/// Verification-report lines that mention errors without being failures.
const SUPPRESSED_PHRASES: [&str; 7] = [
    "graph correctness verification",
    "verification summary",
    "pointer_validity",
    "coordinate_overlap",
    "total errors",
    "error breakdown by type",
    "reference species expected to have overlapping segments",
];

#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub plan: &'a Plan,
    pub base_dir: &'a Path,
    pub settings: &'a RunSettings,
    /// Overrides `plan.dry_run` when set.
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    /// Commands executed (or dry-run logged) successfully in this run.
    pub succeeded: usize,
    /// Commands skipped by resume.
    pub skipped: usize,
}

/// Planner options derived from run settings.
pub fn planner_options(base_dir: &Path, settings: &RunSettings) -> PlannerOptions {
    let mut options = PlannerOptions::new(base_dir).with_thread_count(settings.thread_count);
    options.ramax_executable = settings.ramax_executable.clone();
    options
}

/// Load the tree (if any) and plan every command for `plan`.
pub fn plan_commands(plan: &Plan, base_dir: &Path, settings: &RunSettings) -> Vec<PlannedCommand> {
    let tree = load_alignment_tree(plan, base_dir);
    build_execution_plan(plan, tree.as_ref(), &planner_options(base_dir, settings))
}

pub fn subprocess_launcher(settings: &RunSettings) -> SubprocessLauncher {
    SubprocessLauncher {
        telemetry_interval: Duration::from_millis(settings.telemetry_interval_ms),
        join_timeout: Duration::from_millis(settings.telemetry_join_timeout_ms),
    }
}

/// Execute `request.plan`. A failed step is returned as a [`StepFailure`]
/// inside the error.
#[instrument(skip_all, fields(base_dir = %request.base_dir.display()))]
pub fn run_plan(request: &RunRequest<'_>, launcher: &dyn Launcher) -> Result<RunSummary> {
    let RunRequest { plan, base_dir, settings, .. } = *request;
    let dry_run = request.dry_run.unwrap_or(plan.dry_run);
    let commands = plan_commands(plan, base_dir, settings);
    let log_root = log_root(plan, base_dir);
    fs::create_dir_all(&log_root).with_context(|| format!("create log root {}", log_root.display()))?;

    let mut runner = Runner {
        base_dir,
        settings,
        launcher,
        master: MasterLog::open(&log_root)?,
    };
    let mut summary = RunSummary {
        total: commands.len(),
        ..RunSummary::default()
    };

    if dry_run {
        for command in &commands {
            runner.dry_run(command)?;
            summary.succeeded += 1;
        }
        info!(total = summary.total, "dry run complete");
        return Ok(summary);
    }

    let signature = plan_signature(&commands, base_dir, settings.thread_count);
    let mut store = RunStateStore::open(&state_path(&log_root), &signature)?;
    let skips: HashSet<usize> = if settings.resume {
        store.compute_skips(&commands, base_dir).into_iter().collect()
    } else {
        HashSet::new()
    };
    let first_target = (0..commands.len()).find(|idx| !skips.contains(idx));
    if !skips.is_empty() {
        info!(skipped = skips.len(), "resuming after verified prefix");
    }

    for (index, mut command) in commands.into_iter().enumerate() {
        if skips.contains(&index) {
            store.mark_skipped(&command, index)?;
            runner
                .master
                .resume_skip(&command.display_name, &command.shell_preview())?;
            summary.skipped += 1;
            continue;
        }

        if settings.resume {
            let prior = store.prior_status(&command);
            reconcile_jobstore(&mut command, prior, first_target == Some(index), base_dir);
        }

        store.mark_running(&command, index)?;
        let outcome = runner.execute_with_fallback(&mut command)?;
        store.mark_result(&command, index, outcome.is_ok(), outcome_code(&outcome))?;
        if let Err(failure) = outcome {
            error!(
                command = %failure.display_name(),
                log = %failure.log_path().display(),
                succeeded = summary.succeeded,
                total = summary.total,
                "plan failed"
            );
            return Err(failure.into());
        }
        summary.succeeded += 1;
    }

    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        "plan completed"
    );
    Ok(summary)
}

fn outcome_code(outcome: &Result<(), StepFailure>) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(failure) => failure.exit_code(),
    }
}

struct Runner<'a> {
    base_dir: &'a Path,
    settings: &'a RunSettings,
    launcher: &'a dyn Launcher,
    master: MasterLog,
}

impl Runner<'_> {
    fn dry_run(&mut self, command: &PlannedCommand) -> Result<()> {
        let started = Instant::now();
        let preview = command.shell_preview();
        self.master.start(&command.display_name, &preview)?;
        StepLog::open(&command.log_path)?.dry_run(&preview)?;
        self.master.dry_run_done(started.elapsed())
    }

    /// Run `command`; if it fails and carries cactus fallback commands, run
    /// those instead. The fallback's failure replaces the original one.
    fn execute_with_fallback(&mut self, command: &mut PlannedCommand) -> Result<Result<(), StepFailure>> {
        let first = self.execute(command)?;
        let Err(failure) = first else {
            return Ok(Ok(()));
        };
        if command.fallback.is_empty() {
            return Ok(Err(failure));
        }

        warn!(
            command = %command.display_name,
            fallback = command.fallback.len(),
            "RaMAx failed; falling back to cactus"
        );
        self.master.line(&format!(
            "[fallback] {} failed; running {} cactus step(s)",
            command.display_name,
            command.fallback.len()
        ))?;
        for fallback in &mut command.fallback {
            if self.settings.resume {
                reconcile_jobstore(fallback, None, false, self.base_dir);
            }
            if let Err(failure) = self.execute(fallback)? {
                return Ok(Err(failure));
            }
        }
        Ok(Ok(()))
    }

    /// One attempt. `Err` in the outer result is a logging/filesystem error.
    fn execute(&mut self, command: &PlannedCommand) -> Result<Result<(), StepFailure>> {
        let started = Instant::now();
        let preview = command.shell_preview();
        self.master.start(&command.display_name, &preview)?;

        if let Some(workdir) = &command.workdir {
            fs::create_dir_all(workdir)
                .with_context(|| format!("create workdir {}", workdir.display()))?;
        }

        let mut step_log = StepLog::open(&command.log_path)?;
        step_log.header(&preview)?;

        let request = LaunchRequest {
            args: &command.args,
            cwd: self.base_dir,
            env: &self.settings.env,
        };
        let verbose = self.settings.verbose;
        let quiet = self.settings.quiet;
        let master = &mut self.master;
        let mut write_err: Option<anyhow::Error> = None;
        let launched = self.launcher.launch(&request, &mut |line| {
            if write_err.is_none()
                && let Err(err) = step_log.line(line).and_then(|()| master.line(line))
            {
                write_err = Some(err);
            }
            if !quiet && should_surface(line, verbose) {
                eprintln!("{line}");
            }
        });
        if let Some(err) = write_err {
            return Err(err);
        }

        let log_path = command.log_path.clone();
        match launched {
            Err(err) => {
                let message = format!("[error] Failed to launch {}: {err}", command.display_name);
                step_log.line(&message)?;
                self.master.line(&message)?;
                if !quiet {
                    eprintln!("{message}");
                }
                Ok(Err(StepFailure::Launch {
                    display_name: command.display_name.clone(),
                    log_path,
                    message: err.to_string(),
                }))
            }
            Ok(exit) => {
                let elapsed = started.elapsed();
                step_log.trailer(exit.code, elapsed)?;
                self.master.end(&command.display_name, exit.code, elapsed)?;
                info!(
                    command = %command.display_name,
                    exit_code = exit.code,
                    elapsed_secs = elapsed.as_secs_f64(),
                    cpu_percent = exit.telemetry.cpu_percent,
                    peak_memory = %format_bytes(exit.telemetry.peak_memory_bytes),
                    "command finished"
                );
                if exit.success() {
                    Ok(Ok(()))
                } else {
                    Ok(Err(StepFailure::Exit {
                        display_name: command.display_name.clone(),
                        log_path,
                        exit_code: exit.code,
                    }))
                }
            }
        }
    }
}

/// Whether a child output line is echoed to stderr.
pub fn should_surface(line: &str, verbose: bool) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    if verbose {
        return true;
    }
    let lowered = line.to_lowercase();
    if SUPPRESSED_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return false;
    }
    IMPORTANT_RE.is_match(line)
}

/// Path of the master log for `plan`.
pub fn master_log_path(plan: &Plan, base_dir: &Path) -> PathBuf {
    log_root(plan, base_dir).join(crate::io::logs::MASTER_LOG_FILE)
}
