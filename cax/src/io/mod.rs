//! Side-effecting adapters: files, processes, and sampling.

pub mod config;
pub mod jobstore;
pub mod logs;
pub mod outputs;
pub mod plan_store;
pub mod process;
pub mod run_state;
pub mod script;
pub mod telemetry;
pub mod tree_source;
