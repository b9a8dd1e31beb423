//! Run settings stored in `cax.toml` next to the plan.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::planner::DEFAULT_RAMAX_EXECUTABLE;

pub const SETTINGS_FILE: &str = "cax.toml";

/// Run settings (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunSettings {
    /// Skip the already-successful prefix and reconcile jobstores.
    pub resume: bool,

    /// Thread override injected as `--maxCores` / `--threads`.
    pub thread_count: Option<u32>,

    /// Echo every child output line to stderr.
    pub verbose: bool,

    /// Suppress the important-line echo entirely.
    pub quiet: bool,

    pub ramax_executable: String,

    /// Telemetry sampling interval in milliseconds.
    pub telemetry_interval_ms: u64,

    /// Upper bound on waiting for the telemetry thread after a command exits.
    pub telemetry_join_timeout_ms: u64,

    /// Extra environment variables for child processes.
    pub env: BTreeMap<String, String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            resume: true,
            thread_count: None,
            verbose: false,
            quiet: false,
            ramax_executable: DEFAULT_RAMAX_EXECUTABLE.to_string(),
            telemetry_interval_ms: 500,
            telemetry_join_timeout_ms: 2_000,
            env: BTreeMap::new(),
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == Some(0) {
            return Err(anyhow!("thread_count must be > 0 when set"));
        }
        if self.ramax_executable.trim().is_empty() {
            return Err(anyhow!("ramax_executable cannot be empty"));
        }
        if self.telemetry_interval_ms == 0 {
            return Err(anyhow!("telemetry_interval_ms must be > 0"));
        }
        if self.telemetry_join_timeout_ms == 0 {
            return Err(anyhow!("telemetry_join_timeout_ms must be > 0"));
        }
        if self.verbose && self.quiet {
            return Err(anyhow!("verbose and quiet are mutually exclusive"));
        }
        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(anyhow!("invalid env variable name '{key}'"));
        }
        Ok(())
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `RunSettings::default()`.
pub fn load_settings(path: &Path) -> Result<RunSettings> {
    if !path.exists() {
        return Ok(RunSettings::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: RunSettings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}
