//! Plan data model: steps, alignment rounds, and the full execution plan.
//!
//! A [`Plan`] is produced upstream (parsed from `cactus-prepare` output and
//! edited by the user) and consumed read-mostly here. The only fields an
//! editor is expected to touch between planning passes are a round's
//! `replace_with_ramax`, `subtree_mode`, and option lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Legacy option token marking a round as subtree-mode. Never passed to RaMAx.
pub const SUBTREE_MODE_MARKER: &str = "--subtree-mode";

/// What a step does in the pipeline. Also used as the planned command category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Preprocess,
    Blast,
    Align,
    Hal2fasta,
    Halmerge,
    Ramax,
    Other,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Blast => "blast",
            Self::Align => "align",
            Self::Hal2fasta => "hal2fasta",
            Self::Halmerge => "halmerge",
            Self::Ramax => "ramax",
            Self::Other => "other",
        }
    }
}

/// What to do when a RaMAx substitution fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// Run the round's original cactus blast/align steps instead.
    #[default]
    #[serde(rename = "cactus", alias = "use-cactus")]
    UseCactus,
    #[serde(rename = "abort")]
    Abort,
}

/// Metadata captured from the `cactus-prepare` output header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareHeader {
    pub generated_by: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cactus_commit: Option<String>,
}

impl PrepareHeader {
    pub fn new(generated_by: impl AsRef<str>, date: DateTime<Utc>) -> Self {
        Self {
            generated_by: generated_by.as_ref().trim().to_string(),
            date,
            cactus_commit: None,
        }
    }
}

/// A single command line from the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub raw: String,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobstore: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Step {
    pub fn new(raw: impl AsRef<str>, kind: StepKind) -> Self {
        Self {
            raw: raw.as_ref().trim().to_string(),
            kind,
            jobstore: None,
            out_files: Vec::new(),
            root: None,
            log_file: None,
            label: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_jobstore(mut self, jobstore: impl Into<String>) -> Self {
        self.jobstore = Some(jobstore.into());
        self
    }

    pub fn with_out_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.out_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Concise label for log names and display.
    ///
    /// Explicit label first, then `<kind>-<root>` for blast/align/ramax steps,
    /// then the program name.
    pub fn short_label(&self) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.trim().is_empty()) {
            return label.to_string();
        }
        if matches!(self.kind, StepKind::Blast | StepKind::Align | StepKind::Ramax)
            && let Some(root) = self.root.as_deref().filter(|r| !r.is_empty())
        {
            return format!("{}-{}", self.kind.as_str(), root);
        }
        self.raw
            .split_whitespace()
            .next()
            .unwrap_or("step")
            .to_string()
    }
}

/// Index of a round within [`Plan::rounds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundId(pub usize);

/// One alignment stage keyed to a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub name: String,
    /// Tree node this round aligns (binds by exact name).
    pub root: String,
    pub target_hal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blast_step: Option<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align_step: Option<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hal2fasta_steps: Vec<Step>,
    #[serde(default)]
    pub replace_with_ramax: bool,
    /// RaMAx at this round covers its whole descendant subtree.
    #[serde(default)]
    pub subtree_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ramax_opts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_ramax_command: Option<String>,
}

impl Round {
    /// A cactus round with both blast and align steps.
    pub fn cactus(
        name: impl Into<String>,
        root: impl Into<String>,
        target_hal: impl Into<String>,
        blast: Step,
        align: Step,
    ) -> Self {
        Self {
            blast_step: Some(blast),
            align_step: Some(align),
            replace_with_ramax: false,
            ..Self::ramax(name, root, target_hal)
        }
    }

    /// A round replaced by RaMAx with no cactus steps attached.
    pub fn ramax(
        name: impl Into<String>,
        root: impl Into<String>,
        target_hal: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            target_hal: target_hal.into(),
            blast_step: None,
            align_step: None,
            hal2fasta_steps: Vec::new(),
            replace_with_ramax: true,
            subtree_mode: false,
            workdir: None,
            ramax_opts: Vec::new(),
            manual_ramax_command: None,
        }
    }

    /// True when the round is in subtree mode, either through the field or the
    /// legacy option token.
    pub fn is_subtree_mode(&self) -> bool {
        self.subtree_mode || self.ramax_opts.iter().any(|opt| opt == SUBTREE_MODE_MARKER)
    }

    /// Round options that reach the RaMAx executable.
    pub fn passthrough_ramax_opts(&self) -> impl Iterator<Item = &str> {
        self.ramax_opts
            .iter()
            .map(String::as_str)
            .filter(|opt| *opt != SUBTREE_MODE_MARKER)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_hal.trim().is_empty() {
            return Err(ValidationError::EmptyTargetHal {
                round: self.name.clone(),
            });
        }
        if !self.replace_with_ramax && (self.blast_step.is_none() || self.align_step.is_none()) {
            return Err(ValidationError::MissingCactusSteps {
                round: self.name.clone(),
            });
        }
        let steps = self
            .blast_step
            .iter()
            .chain(self.align_step.iter())
            .chain(self.hal2fasta_steps.iter());
        for step in steps {
            validate_step(step, &format!("round '{}'", self.name))?;
        }
        Ok(())
    }
}

/// Full execution plan assembled from the `cactus-prepare` script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub header: PrepareHeader,
    #[serde(default)]
    pub preprocess: Vec<Step>,
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default)]
    pub hal_merges: Vec<Step>,
    pub out_seq_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_ramax_opts: Vec<String>,
}

impl Plan {
    pub fn new(header: PrepareHeader, out_seq_file: impl Into<String>) -> Self {
        Self {
            header,
            preprocess: Vec::new(),
            rounds: Vec::new(),
            hal_merges: Vec::new(),
            out_seq_file: out_seq_file.into(),
            out_dir: None,
            dry_run: false,
            fallback_policy: FallbackPolicy::default(),
            global_ramax_opts: Vec::new(),
        }
    }

    pub fn round(&self, id: RoundId) -> Option<&Round> {
        self.rounds.get(id.0)
    }

    pub fn round_ids(&self) -> impl Iterator<Item = RoundId> + use<> {
        (0..self.rounds.len()).map(RoundId)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.out_seq_file.trim().is_empty() {
            return Err(ValidationError::EmptyOutSeqFile);
        }
        for step in &self.preprocess {
            validate_step(step, "preprocess")?;
        }
        for round in &self.rounds {
            round.validate()?;
        }
        for step in &self.hal_merges {
            validate_step(step, "hal merge")?;
        }
        Ok(())
    }
}

fn validate_step(step: &Step, context: &str) -> Result<(), ValidationError> {
    if step.raw.trim().is_empty() {
        return Err(ValidationError::EmptyCommand {
            context: context.to_string(),
        });
    }
    Ok(())
}
