//! Typed failures surfaced by the tree model, plan validation, and the runner.
//!
//! Orchestration code propagates these through `anyhow`; callers that need to
//! branch on the failure kind (the CLI exit code, tests) downcast.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Malformed Newick text. Callers fall back to flat planning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NewickError {
    #[error("empty tree text")]
    Empty,

    #[error("expected ',' or ')' at position {0}")]
    ExpectedSeparator(usize),

    #[error("missing leaf label at position {0}")]
    MissingLabel(usize),

    #[error("unexpected trailing data at position {0}")]
    TrailingData(usize),

    #[error("tree nested too deeply at position {0}")]
    TooDeep(usize),
}

/// A plan or round invariant does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("plan out_seq_file cannot be empty")]
    EmptyOutSeqFile,

    #[error("round '{round}': target_hal cannot be empty")]
    EmptyTargetHal { round: String },

    #[error("round '{round}': blast_step and align_step are required when not replacing with RaMAx")]
    MissingCactusSteps { round: String },

    #[error("{context}: step command is empty")]
    EmptyCommand { context: String },
}

/// The external executable could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{hint}")]
pub struct LaunchError {
    pub message: String,
    /// Extra guidance appended to the message (PATH or permission hint).
    pub hint: String,
}

impl LaunchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: String::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }
}

/// A planned command failed and the run was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    #[error("failed to launch {display_name}: {message} (log: {})", log_path.display())]
    Launch {
        display_name: String,
        log_path: PathBuf,
        message: String,
    },

    #[error("command {display_name} exited with code {exit_code} (log: {})", log_path.display())]
    Exit {
        display_name: String,
        log_path: PathBuf,
        exit_code: i32,
    },
}

impl StepFailure {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Launch { display_name, .. } | Self::Exit { display_name, .. } => display_name,
        }
    }

    pub fn log_path(&self) -> &Path {
        match self {
            Self::Launch { log_path, .. } | Self::Exit { log_path, .. } => log_path,
        }
    }

    /// Exit code recorded in the run state. Launch failures record `-1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Launch { .. } => -1,
            Self::Exit { exit_code, .. } => *exit_code,
        }
    }
}
