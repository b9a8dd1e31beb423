//! Orchestrator for Cactus/RaMAx progressive genome-alignment plans.
//!
//! A plan lists preprocess steps, one alignment round per ancestral tree node,
//! and HAL merge steps. The crate turns that plan into concrete external
//! commands and runs them resumably. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (Newick parsing, the alignment
//!   tree, planning, resume keys, jobstore decisions). No I/O.
//! - **[`io`]**: Side-effecting operations (plan and state files, logs,
//!   subprocesses, telemetry). Isolated behind small seams such as
//!   [`io::process::Launcher`] so tests can script them.
//!
//! Orchestration modules ([`run`], [`preview`]) combine the two to implement
//! CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod preview;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
