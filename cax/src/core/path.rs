//! Lexical path resolution against the run base directory.

use std::path::{Component, Path, PathBuf};

use crate::plan::Plan;

/// Resolve `raw` against `base`: absolute paths are kept, relative paths are
/// joined. Either way the result is lexically normalized.
pub fn resolve_path(raw: impl AsRef<Path>, base: &Path) -> PathBuf {
    let raw = raw.as_ref();
    if raw.is_absolute() {
        normalize(raw)
    } else {
        normalize(&base.join(raw))
    }
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// A `..` that would climb past the root of an absolute path is dropped; on a
/// relative path it is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Directory holding step logs, the master log, and the run state.
pub fn log_root(plan: &Plan, base_dir: &Path) -> PathBuf {
    match plan.out_dir.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(out_dir) => resolve_path(out_dir, base_dir).join("logs"),
        None => normalize(&base_dir.join("logs")),
    }
}
