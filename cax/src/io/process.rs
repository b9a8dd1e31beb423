//! Launching external pipeline commands.
//!
//! stdout and stderr are drained concurrently by two reader threads into one
//! channel, so the caller sees a single combined stream line by line while
//! the child runs.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use crate::error::LaunchError;
use crate::io::telemetry::{Sampler, TelemetrySample};

/// One external invocation.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub args: &'a [String],
    pub cwd: &'a Path,
    /// Overrides layered over the inherited environment.
    pub env: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessExit {
    pub code: i32,
    pub telemetry: TelemetrySample,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Seam between the runner and real processes; tests script it.
pub trait Launcher {
    /// Run to completion, passing every combined output line to `on_line`.
    fn launch(
        &self,
        request: &LaunchRequest<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, LaunchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubprocessLauncher {
    pub telemetry_interval: Duration,
    pub join_timeout: Duration,
}

impl Default for SubprocessLauncher {
    fn default() -> Self {
        Self {
            telemetry_interval: Duration::from_millis(500),
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl Launcher for SubprocessLauncher {
    #[instrument(skip_all, fields(program = request.args.first().map(String::as_str).unwrap_or("")))]
    fn launch(
        &self,
        request: &LaunchRequest<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, LaunchError> {
        let Some((program, rest)) = request.args.split_first() else {
            return Err(LaunchError::new("empty command"));
        };
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(request.cwd)
            .envs(request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, "failed to spawn command");
                return Err(launch_error(program, &err, request.env));
            }
        };

        let sampler = Sampler::start(child.id(), self.telemetry_interval, self.join_timeout);
        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        for line in rx {
            on_line(&line);
        }
        for reader in readers {
            if reader.join().is_err() {
                warn!("output reader thread panicked");
            }
        }

        let status = child.wait();
        let telemetry = sampler.stop();
        let status = status.map_err(|err| LaunchError::new(format!("wait for command: {err}")))?;
        let code = exit_code(status);
        debug!(exit_code = code, "command finished");
        Ok(ProcessExit { code, telemetry })
    }
}

fn forward_lines<R: Read + Send + 'static>(
    reader: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(err = %err, "read child output");
                    break;
                }
            }
        }
    })
}

/// Exit code, or the negated signal number when killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

fn launch_error(program: &str, err: &io::Error, env_overrides: &BTreeMap<String, String>) -> LaunchError {
    let base = LaunchError::new(err.to_string());
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            let path_var = env_overrides
                .get("PATH")
                .map(OsString::from)
                .or_else(|| env::var_os("PATH"));
            match resolve_executable(program, path_var.as_deref()) {
                Some(found) if !is_executable(&found) => {
                    base.with_hint(format!(" (missing execute bit: {})", found.display()))
                }
                _ => base,
            }
        }
        io::ErrorKind::NotFound => {
            base.with_hint(format!(" (is `{program}` installed and on PATH?)"))
        }
        _ => base,
    }
}

/// First PATH entry containing `program`, executable or not.
pub fn resolve_executable(program: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.is_absolute() || program.contains('/') {
        return direct.exists().then(|| direct.to_path_buf());
    }
    env::split_paths(path_var?)
        .filter(|entry| !entry.as_os_str().is_empty())
        .map(|entry| entry.join(program))
        .find(|candidate| candidate.exists())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
