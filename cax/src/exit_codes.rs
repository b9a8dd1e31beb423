//! Stable exit codes for `cax` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid plan, settings, or arguments, or another non-step error.
pub const INVALID: i32 = 1;
/// A pipeline step failed to launch or exited non-zero.
pub const STEP_FAILED: i32 = 2;
