//! Master and per-step log files.
//!
//! These are product artifacts for the user, separate from `tracing` output.
//! Both logs are append-only and flushed after every write.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const MASTER_LOG_FILE: &str = "cax-run.log";

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn secs(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

/// `<log_root>/cax-run.log`, shared by every command of a run.
#[derive(Debug)]
pub struct MasterLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl MasterLog {
    pub fn open(log_root: &Path) -> Result<Self> {
        let path = log_root.join(MASTER_LOG_FILE);
        let writer = open_append(&path)?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start(&mut self, display_name: &str, preview: &str) -> Result<()> {
        self.line(&format!("[start] {display_name}: {preview}"))
    }

    pub fn end(&mut self, display_name: &str, exit_code: i32, elapsed: Duration) -> Result<()> {
        self.line(&format!("[end] {display_name} -> {exit_code} ({})", secs(elapsed)))
    }

    pub fn resume_skip(&mut self, display_name: &str, preview: &str) -> Result<()> {
        self.line(&format!("[resume] skip {display_name}: {preview}"))
    }

    pub fn dry_run_done(&mut self, elapsed: Duration) -> Result<()> {
        self.line(&format!("[skip] dry-run complete in {}", secs(elapsed)))
    }

    /// Append one line, adding a newline when missing.
    pub fn line(&mut self, text: &str) -> Result<()> {
        write_line(&mut self.writer, text).with_context(|| format!("write {}", self.path.display()))
    }
}

/// Per-command log, opened in append mode for each attempt.
#[derive(Debug)]
pub struct StepLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StepLog {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&mut self, preview: &str) -> Result<()> {
        self.line(&format!("# Command: {preview}"))
    }

    pub fn dry_run(&mut self, preview: &str) -> Result<()> {
        self.line("# DRY RUN")?;
        self.line(&format!("# {preview}"))
    }

    pub fn trailer(&mut self, exit_code: i32, elapsed: Duration) -> Result<()> {
        self.line(&format!("\n# Exit code: {exit_code} ({})", secs(elapsed)))
    }

    pub fn line(&mut self, text: &str) -> Result<()> {
        write_line(&mut self.writer, text).with_context(|| format!("write {}", self.path.display()))
    }
}

fn write_line(writer: &mut impl Write, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
