//! Shared deterministic types for core logic.
//!
//! These types define stable contracts between the planner, the resume engine,
//! and the runner. They must not depend on external state.

use serde::{Deserialize, Serialize};

/// Persisted status of a planned command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Running,
    Success,
    Failed,
}

impl CommandStatus {
    /// Status left behind by an interrupted or failed run.
    pub fn is_incomplete(self) -> bool {
        matches!(self, Self::Running | Self::Failed)
    }
}
