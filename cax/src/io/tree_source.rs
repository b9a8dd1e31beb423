//! Locate and load the alignment tree for a plan.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::alignment_tree::AlignmentTree;
use crate::core::command::split_command;
use crate::core::path::resolve_path;
use crate::plan::Plan;

/// Newick text for `plan`.
///
/// First non-blank line of `out_seq_file`; failing that, the first existing
/// non-flag file argument of the first preprocess step that has one.
pub fn read_newick(plan: &Plan, base_dir: &Path) -> Option<String> {
    let primary = resolve_path(&plan.out_seq_file, base_dir);
    if let Some(line) = first_nonblank_line(&primary) {
        return Some(line);
    }
    let step = plan.preprocess.first()?;
    let found = candidate_paths(&split_command(&step.raw), base_dir).find_map(|path| {
        let line = first_nonblank_line(&path)?;
        debug!(path = %path.display(), "tree read from preprocess input");
        Some(line)
    });
    found
}

/// Build the alignment tree, or `None` when no usable tree is available.
pub fn load_alignment_tree(plan: &Plan, base_dir: &Path) -> Option<AlignmentTree> {
    let Some(newick) = read_newick(plan, base_dir) else {
        warn!(out_seq_file = %plan.out_seq_file, "no tree found; planning rounds in declaration order");
        return None;
    };
    match AlignmentTree::build(&newick, plan) {
        Ok(tree) => Some(tree),
        Err(err) => {
            warn!(error = %err, "tree parse failed; planning rounds in declaration order");
            None
        }
    }
}

fn candidate_paths<'a>(tokens: &'a [String], base_dir: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
    tokens
        .iter()
        .filter(|token| !token.starts_with('-'))
        .map(move |token| resolve_path(token, base_dir))
        .filter(|path| path.is_file())
}

fn first_nonblank_line(path: &Path) -> Option<String> {
    let contents = fs::read(path).ok()?;
    String::from_utf8_lossy(&contents)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
