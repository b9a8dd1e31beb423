//! Plan + tree → ordered planned commands.
//!
//! The planner is deterministic: identical plans, trees, and options always
//! produce identical command lists. It decides which rounds run (absorption),
//! how RaMAx substitutions are spelled, and how raw step text is normalized.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::alignment_tree::AlignmentTree;
use crate::core::command::{
    CACTUS_THREADS_FLAG, PlannedCommand, RAMAX_DISPLAY_PREFIX, RAMAX_THREADS_FLAG, ToolFamily,
    has_flag, normalize_hal2fasta, split_command,
};
use crate::core::path::{log_root, resolve_path};
use crate::plan::{FallbackPolicy, Plan, Round, RoundId, Step, StepKind};

pub const DEFAULT_RAMAX_EXECUTABLE: &str = "RaMAx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOptions {
    pub base_dir: PathBuf,
    pub thread_count: Option<u32>,
    pub ramax_executable: String,
}

impl PlannerOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            thread_count: None,
            ramax_executable: DEFAULT_RAMAX_EXECUTABLE.to_string(),
        }
    }

    pub fn with_thread_count(mut self, threads: Option<u32>) -> Self {
        self.thread_count = threads;
        self
    }
}

/// Materialize every command the plan runs, in execution order.
pub fn build_execution_plan(
    plan: &Plan,
    tree: Option<&AlignmentTree>,
    options: &PlannerOptions,
) -> Vec<PlannedCommand> {
    let ctx = Context {
        plan,
        options,
        log_root: log_root(plan, &options.base_dir),
    };
    let absorbed = tree.map(|t| absorbed_rounds(plan, t)).unwrap_or_default();

    let mut commands = Vec::new();
    for step in &plan.preprocess {
        commands.push(ctx.from_step(step, StepKind::Preprocess, None));
    }

    for id in round_order(plan, tree) {
        if absorbed.contains(&id) {
            debug!(round = %plan.rounds[id.0].name, "round absorbed by ancestor RaMAx");
            continue;
        }
        commands.extend(ctx.round_commands(&plan.rounds[id.0]));
    }

    let absorbed_roots: HashSet<&str> = absorbed
        .iter()
        .map(|id| plan.rounds[id.0].root.as_str())
        .collect();
    for step in &plan.hal_merges {
        if let Some(root) = step.root.as_deref()
            && absorbed_roots.contains(root)
        {
            debug!(root, "hal merge skipped for absorbed round");
            continue;
        }
        commands.push(ctx.from_step(step, StepKind::Halmerge, None));
    }

    if let Some(threads) = options.thread_count {
        for command in &mut commands {
            apply_thread_override(command, threads);
        }
    }
    commands
}

/// Rounds whose work is covered by an ancestor RaMAx invocation.
pub fn absorbed_rounds(plan: &Plan, tree: &AlignmentTree) -> HashSet<RoundId> {
    let mut absorbed = HashSet::new();
    for node in tree.walk() {
        let Some(id) = tree.node(node).round else {
            continue;
        };
        let Some(round) = plan.round(id) else {
            continue;
        };
        let ancestor_rounds: Vec<&Round> = tree
            .ancestors(node)
            .filter_map(|a| tree.node(a).round)
            .filter_map(|r| plan.round(r))
            .collect();
        let subtree_ancestor = ancestor_rounds
            .iter()
            .any(|a| a.replace_with_ramax && a.is_subtree_mode());
        let ramax_ancestor = ancestor_rounds.iter().any(|a| a.replace_with_ramax);
        if subtree_ancestor || (round.replace_with_ramax && ramax_ancestor) {
            absorbed.insert(id);
        }
    }
    absorbed
}

/// Tree pre-order, then rounds the tree does not reach in declaration order.
fn round_order(plan: &Plan, tree: Option<&AlignmentTree>) -> Vec<RoundId> {
    let Some(tree) = tree else {
        return plan.round_ids().collect();
    };
    let mut order: Vec<RoundId> = tree
        .iter_rounds()
        .filter(|id| id.0 < plan.rounds.len())
        .collect();
    let seen: HashSet<RoundId> = order.iter().copied().collect();
    order.extend(plan.round_ids().filter(|id| !seen.contains(id)));
    order
}

fn apply_thread_override(command: &mut PlannedCommand, threads: u32) {
    let flag = match command.tool_family() {
        ToolFamily::Cactus => CACTUS_THREADS_FLAG,
        ToolFamily::Ramax => RAMAX_THREADS_FLAG,
        ToolFamily::Other => return,
    };
    if !has_flag(&command.args, flag) {
        command.args.push(flag.to_string());
        command.args.push(threads.to_string());
    }
    for fallback in &mut command.fallback {
        apply_thread_override(fallback, threads);
    }
}

struct Context<'a> {
    plan: &'a Plan,
    options: &'a PlannerOptions,
    log_root: PathBuf,
}

impl Context<'_> {
    fn base(&self) -> &Path {
        &self.options.base_dir
    }

    fn default_log(&self, display_name: &str) -> PathBuf {
        self.log_root.join(format!("{display_name}.log"))
    }

    fn round_commands(&self, round: &Round) -> Vec<PlannedCommand> {
        let mut commands = Vec::new();
        if round.replace_with_ramax {
            commands.push(self.ramax_command(round));
        } else {
            if let Some(blast) = &round.blast_step {
                commands.push(self.from_step(blast, StepKind::Blast, Some(&round.name)));
            }
            if let Some(align) = &round.align_step {
                commands.push(self.from_step(align, StepKind::Align, Some(&round.name)));
            }
        }
        for step in &round.hal2fasta_steps {
            commands.push(self.from_step(step, StepKind::Hal2fasta, Some(&round.name)));
        }
        commands
    }

    fn from_step(&self, step: &Step, category: StepKind, round_name: Option<&str>) -> PlannedCommand {
        let mut args = split_command(&step.raw);
        if step.kind == StepKind::Hal2fasta {
            args = normalize_hal2fasta(args);
        }
        let display_name = step.short_label();
        let log_path = match step.log_file.as_deref().filter(|l| !l.trim().is_empty()) {
            Some(log) => resolve_path(log, self.base()),
            None => self.default_log(&display_name),
        };
        PlannedCommand {
            args,
            category,
            display_name,
            log_path,
            workdir: None,
            round_name: round_name.map(str::to_string),
            step: Some(step.clone()),
            is_ramax: false,
            fallback: Vec::new(),
            outputs: step
                .out_files
                .iter()
                .map(|out| resolve_path(out, self.base()))
                .collect(),
        }
    }

    fn ramax_command(&self, round: &Round) -> PlannedCommand {
        let plan = self.plan;
        let workdir = round
            .workdir
            .clone()
            .filter(|w| !w.trim().is_empty())
            .or_else(|| {
                plan.out_dir.as_ref().map(|out| {
                    Path::new(out)
                        .join("temps")
                        .join(format!("blast-{}", round.root))
                        .to_string_lossy()
                        .into_owned()
                })
            });

        let manual = round
            .manual_ramax_command
            .as_deref()
            .map(split_command)
            .filter(|tokens| !tokens.is_empty());
        let args = manual.unwrap_or_else(|| {
            let mut args = vec![
                self.options.ramax_executable.clone(),
                "-i".to_string(),
                plan.out_seq_file.clone(),
                "-o".to_string(),
                round.target_hal.clone(),
                "--root".to_string(),
                round.root.clone(),
            ];
            if let Some(workdir) = &workdir {
                args.push("-w".to_string());
                args.push(workdir.clone());
            }
            args.extend(plan.global_ramax_opts.iter().cloned());
            args.extend(round.passthrough_ramax_opts().map(str::to_string));
            args
        });

        let display_name = format!("{RAMAX_DISPLAY_PREFIX}{}", round.root);
        let fallback = match plan.fallback_policy {
            FallbackPolicy::UseCactus => {
                let mut steps = Vec::new();
                if let Some(blast) = &round.blast_step {
                    steps.push(self.from_step(blast, StepKind::Blast, Some(&round.name)));
                }
                if let Some(align) = &round.align_step {
                    steps.push(self.from_step(align, StepKind::Align, Some(&round.name)));
                }
                steps
            }
            FallbackPolicy::Abort => Vec::new(),
        };

        PlannedCommand {
            args,
            category: StepKind::Ramax,
            log_path: self.ramax_log_path(round, &display_name),
            display_name,
            workdir: workdir.map(|w| resolve_path(w, self.base())),
            round_name: Some(round.name.clone()),
            step: None,
            is_ramax: true,
            fallback,
            outputs: vec![resolve_path(&round.target_hal, self.base())],
        }
    }

    fn ramax_log_path(&self, round: &Round, display_name: &str) -> PathBuf {
        let align_log = round
            .align_step
            .as_ref()
            .and_then(|step| step.log_file.as_deref())
            .filter(|log| !log.trim().is_empty());
        if let Some(log) = align_log {
            let log = Path::new(log);
            let renamed = log
                .file_name()
                .map(|name| name.to_string_lossy().replace("align", "ramax"))
                .unwrap_or_else(|| format!("{display_name}.log"));
            return resolve_path(log.with_file_name(renamed), self.base());
        }
        if let Some(out_dir) = self.plan.out_dir.as_deref() {
            let log = Path::new(out_dir)
                .join("logs")
                .join(format!("ramax-{}.log", round.root));
            return resolve_path(log, self.base());
        }
        self.default_log(display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SUBTREE_MODE_MARKER;
    use crate::test_support::{cactus_round, plan_with_rounds, ramax_round};

    fn options() -> PlannerOptions {
        PlannerOptions::new("/work")
    }

    fn round_names(commands: &[PlannedCommand]) -> Vec<(&str, StepKind)> {
        commands
            .iter()
            .map(|c| (c.round_name.as_deref().unwrap_or("-"), c.category))
            .collect()
    }

    #[test]
    fn default_ramax_executable_keeps_its_case() {
        let plan = plan_with_rounds(vec![ramax_round("Anc0")]);
        let commands = build_execution_plan(&plan, None, &options());
        let ramax = commands.iter().find(|c| c.is_ramax).expect("ramax command");
        assert_eq!(ramax.args.first().map(String::as_str), Some("RaMAx"));
        assert_eq!(ramax.tool_family(), ToolFamily::Ramax);
    }

    #[test]
    fn flat_plan_uses_declaration_order() {
        let mut plan = plan_with_rounds(vec![cactus_round("Anc1"), cactus_round("Anc0")]);
        plan.preprocess
            .push(Step::new("cactus-preprocess js in.txt seq.txt", StepKind::Preprocess));
        plan.hal_merges
            .push(Step::new("halAppendSubtree Anc0.hal Anc1.hal Anc1 Anc1", StepKind::Halmerge).with_root("Anc1"));

        let commands = build_execution_plan(&plan, None, &options());
        assert_eq!(
            round_names(&commands),
            vec![
                ("-", StepKind::Preprocess),
                ("Anc1", StepKind::Blast),
                ("Anc1", StepKind::Align),
                ("Anc0", StepKind::Blast),
                ("Anc0", StepKind::Align),
                ("-", StepKind::Halmerge),
            ]
        );
        assert_eq!(commands[1].display_name, "blast-Anc1");
        assert_eq!(commands[1].log_path, PathBuf::from("/work/logs/blast-Anc1.log"));
        assert_eq!(commands[1].outputs, vec![PathBuf::from("/work/Anc1.paf")]);
    }

    #[test]
    fn tree_plan_runs_rounds_in_pre_order() {
        let plan = plan_with_rounds(vec![cactus_round("Anc1"), cactus_round("Anc0")]);
        let tree = AlignmentTree::build("((a,b)Anc1,c)Anc0;", &plan).expect("tree");
        let commands = build_execution_plan(&plan, Some(&tree), &options());
        assert_eq!(commands[0].round_name.as_deref(), Some("Anc0"));
        assert_eq!(commands[2].round_name.as_deref(), Some("Anc1"));
    }

    #[test]
    fn subtree_mode_absorbs_every_descendant() {
        let mut root = ramax_round("Anc0");
        root.subtree_mode = true;
        let mut explicit = cactus_round("Anc2");
        explicit.replace_with_ramax = false;
        let plan = plan_with_rounds(vec![root, cactus_round("Anc1"), explicit]);
        let tree = AlignmentTree::build("(((a,b)Anc2,c)Anc1,d)Anc0;", &plan).expect("tree");

        let commands = build_execution_plan(&plan, Some(&tree), &options());
        assert_eq!(commands.len(), 1);
        assert!(commands[0].is_ramax);
        assert_eq!(commands[0].round_name.as_deref(), Some("Anc0"));
    }

    #[test]
    fn explicit_cactus_survives_plain_ramax_ancestor() {
        let plan = plan_with_rounds(vec![ramax_round("Anc0"), cactus_round("Anc1")]);
        let tree = AlignmentTree::build("((a,b)Anc1,c)Anc0;", &plan).expect("tree");

        let commands = build_execution_plan(&plan, Some(&tree), &options());
        assert_eq!(
            round_names(&commands),
            vec![
                ("Anc0", StepKind::Ramax),
                ("Anc1", StepKind::Blast),
                ("Anc1", StepKind::Align),
            ]
        );
    }

    #[test]
    fn redundant_descendant_ramax_is_suppressed() {
        let plan = plan_with_rounds(vec![ramax_round("Anc0"), ramax_round("Anc1")]);
        let tree = AlignmentTree::build("((a,b)Anc1,c)Anc0;", &plan).expect("tree");

        let absorbed = absorbed_rounds(&plan, &tree);
        assert_eq!(absorbed, HashSet::from([RoundId(1)]));
        let commands = build_execution_plan(&plan, Some(&tree), &options());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].display_name, "RaMAx-Anc0");
    }

    #[test]
    fn hal_merge_for_absorbed_round_is_skipped() {
        let mut root = ramax_round("Anc0");
        root.subtree_mode = true;
        let mut plan = plan_with_rounds(vec![root, cactus_round("Anc1")]);
        plan.hal_merges.push(
            Step::new("halAppendSubtree Anc0.hal Anc1.hal Anc1 Anc1", StepKind::Halmerge)
                .with_root("Anc1"),
        );
        plan.hal_merges
            .push(Step::new("halAppendSubtree Anc0.hal x.hal x x", StepKind::Halmerge).with_root("x"));
        let tree = AlignmentTree::build("((a,b)Anc1,c)Anc0;", &plan).expect("tree");

        let commands = build_execution_plan(&plan, Some(&tree), &options());
        let merges: Vec<&str> = commands
            .iter()
            .filter(|c| c.category == StepKind::Halmerge)
            .filter_map(|c| c.step.as_ref().and_then(|s| s.root.as_deref()))
            .collect();
        assert_eq!(merges, vec!["x"]);
    }

    #[test]
    fn ramax_argv_layout_and_marker_stripping() {
        let mut round = ramax_round("Anc0");
        round.ramax_opts = vec![SUBTREE_MODE_MARKER.to_string(), "--fast".to_string()];
        let mut plan = plan_with_rounds(vec![round]);
        plan.out_dir = Some("out".to_string());
        plan.global_ramax_opts = vec!["--global".to_string()];
        plan.fallback_policy = FallbackPolicy::Abort;

        let commands = build_execution_plan(&plan, None, &options());
        let ramax = &commands[0];
        assert_eq!(
            ramax.args,
            vec![
                "RaMAx", "-i", "seq.txt", "-o", "Anc0.hal", "--root", "Anc0", "-w",
                "out/temps/blast-Anc0", "--global", "--fast",
            ]
        );
        assert_eq!(ramax.workdir, Some(PathBuf::from("/work/out/temps/blast-Anc0")));
        assert_eq!(ramax.log_path, PathBuf::from("/work/out/logs/ramax-Anc0.log"));
        assert_eq!(ramax.outputs, vec![PathBuf::from("/work/Anc0.hal")]);
        assert!(ramax.fallback.is_empty());
        assert!(!ramax.args.iter().any(|a| a == SUBTREE_MODE_MARKER));
    }

    #[test]
    fn ramax_log_derives_from_align_log_and_carries_fallback() {
        let mut round = cactus_round("Anc0");
        round.replace_with_ramax = true;
        if let Some(align) = round.align_step.as_mut() {
            align.log_file = Some("logs/align-Anc0.log".to_string());
        }
        let plan = plan_with_rounds(vec![round]);

        let commands = build_execution_plan(&plan, None, &options());
        let ramax = &commands[0];
        assert_eq!(ramax.log_path, PathBuf::from("/work/logs/ramax-Anc0.log"));
        let fallback: Vec<StepKind> = ramax.fallback.iter().map(|c| c.category).collect();
        assert_eq!(fallback, vec![StepKind::Blast, StepKind::Align]);
    }

    #[test]
    fn manual_command_replaces_generated_argv() {
        let mut round = ramax_round("Anc0");
        round.manual_ramax_command = Some("/opt/ramax --custom 'a b'".to_string());
        let plan = plan_with_rounds(vec![round]);

        let commands = build_execution_plan(&plan, None, &options());
        assert_eq!(commands[0].args, vec!["/opt/ramax", "--custom", "a b"]);
    }

    #[test]
    fn thread_override_targets_cactus_and_ramax_only() {
        let mut plan = plan_with_rounds(vec![cactus_round("Anc1"), ramax_round("Anc0")]);
        plan.preprocess.push(Step::new(
            "cactus-preprocess js in.txt seq.txt --maxCores=2",
            StepKind::Preprocess,
        ));
        plan.hal_merges
            .push(Step::new("halAppendSubtree a.hal b.hal b b", StepKind::Halmerge));
        let opts = options().with_thread_count(Some(8));

        let commands = build_execution_plan(&plan, None, &opts);
        assert_eq!(commands[0].args.last().map(String::as_str), Some("--maxCores=2"));
        assert!(commands[1].args.ends_with(&["--maxCores".to_string(), "8".to_string()]));
        let ramax = commands.iter().find(|c| c.is_ramax).expect("ramax");
        assert!(ramax.args.ends_with(&["--threads".to_string(), "8".to_string()]));
        assert!(ramax.fallback[0].args.ends_with(&["--maxCores".to_string(), "8".to_string()]));
        let merge = commands.last().expect("merge");
        assert!(!merge.args.iter().any(|a| a.starts_with("--")));
    }

    #[test]
    fn hal2fasta_steps_are_normalized_and_always_emitted() {
        let mut round = ramax_round("Anc0");
        round.hal2fasta_steps.push(Step::new(
            "hal2fasta Anc0.hal Anc0 --hdf5InMemory > Anc0.fa",
            StepKind::Hal2fasta,
        ));
        let plan = plan_with_rounds(vec![round]);

        let commands = build_execution_plan(&plan, None, &options());
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[1].args,
            vec!["hal2fasta", "Anc0.hal", "Anc0", "--hdf5InMemory", "--outFaPath", "Anc0.fa"]
        );
    }

    #[test]
    fn planning_is_deterministic() {
        let mut root = ramax_round("Anc0");
        root.ramax_opts = vec!["--x".to_string()];
        let plan = plan_with_rounds(vec![root, cactus_round("Anc1"), cactus_round("Orphan")]);
        let tree = AlignmentTree::build("((a,b)Anc1,c)Anc0;", &plan).expect("tree");
        let opts = options().with_thread_count(Some(4));

        let first = build_execution_plan(&plan, Some(&tree), &opts);
        let second = build_execution_plan(&plan, Some(&tree), &opts);
        assert_eq!(first, second);
    }
}
