//! Test-only builders for plans and planned commands, plus a scripted launcher.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::command::PlannedCommand;
use crate::error::LaunchError;
use crate::io::process::{LaunchRequest, Launcher, ProcessExit};
use crate::io::telemetry::TelemetrySample;
use crate::plan::{Plan, PrepareHeader, Round, Step, StepKind};

pub fn header() -> PrepareHeader {
    PrepareHeader::new("cactus-prepare", chrono::Utc::now())
}

/// Plan over `seq.txt` with no preprocess or merge steps.
pub fn plan_with_rounds(rounds: Vec<Round>) -> Plan {
    let mut plan = Plan::new(header(), "seq.txt");
    plan.rounds = rounds;
    plan
}

/// Cactus round for `root` writing `<root>.paf` and `<root>.hal`.
pub fn cactus_round(root: &str) -> Round {
    let blast = Step::new(
        format!("cactus-blast js/blast-{root} seq.txt {root}.paf --root {root}"),
        StepKind::Blast,
    )
    .with_root(root)
    .with_jobstore(format!("js/blast-{root}"))
    .with_out_files([format!("{root}.paf")]);
    let align = Step::new(
        format!("cactus-align js/align-{root} seq.txt {root}.paf {root}.hal --root {root}"),
        StepKind::Align,
    )
    .with_root(root)
    .with_jobstore(format!("js/align-{root}"))
    .with_out_files([format!("{root}.hal")]);
    Round::cactus(root, root, format!("{root}.hal"), blast, align)
}

/// RaMAx round for `root` without cactus steps.
pub fn ramax_round(root: &str) -> Round {
    Round::ramax(root, root, format!("{root}.hal"))
}

/// Write a plan as pretty JSON with a trailing newline.
pub fn write_plan(plan_path: &Path, plan: &Plan) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(plan)?;
    buf.push('\n');
    if let Some(parent) = plan_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(plan_path, buf).with_context(|| format!("write plan {}", plan_path.display()))
}

/// Bare planned command with no step or outputs.
pub fn planned(display_name: &str, args: &[&str]) -> PlannedCommand {
    PlannedCommand {
        args: args.iter().map(|a| a.to_string()).collect(),
        category: StepKind::Other,
        display_name: display_name.to_string(),
        log_path: PathBuf::from(format!("/tmp/{display_name}.log")),
        workdir: None,
        round_name: None,
        step: None,
        is_ramax: false,
        fallback: Vec::new(),
        outputs: Vec::new(),
    }
}

/// What a scripted invocation prints and returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedRun {
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl ScriptedRun {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }
}

type Handler = Box<dyn Fn(&LaunchRequest<'_>) -> Result<ScriptedRun, LaunchError>>;

/// Launcher that records argv and answers from a closure instead of spawning.
pub struct ScriptedLauncher {
    calls: RefCell<Vec<Vec<String>>>,
    handler: Handler,
}

impl ScriptedLauncher {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&LaunchRequest<'_>) -> Result<ScriptedRun, LaunchError> + 'static,
    {
        Self {
            calls: RefCell::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Every command exits 0 without output.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(ScriptedRun::ok()))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    /// Executable of each call, in order.
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|args| args.first().cloned())
            .collect()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(
        &self,
        request: &LaunchRequest<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, LaunchError> {
        self.calls.borrow_mut().push(request.args.to_vec());
        let run = (self.handler)(request)?;
        for line in &run.lines {
            on_line(line);
        }
        Ok(ProcessExit {
            code: run.exit_code,
            telemetry: TelemetrySample::default(),
        })
    }
}
