//! Deterministic, pure logic shared by the planner and runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod alignment_tree;
pub mod command;
pub mod jobstore;
pub mod newick;
pub mod path;
pub mod planner;
pub mod resume;
pub mod types;
