//! CPU and memory sampling for a running child process tree.
//!
//! One sampler thread per running command publishes into a single shared
//! cell. Sampling never affects control flow: the runner stops the sampler
//! when the child exits and waits at most `join_timeout` for it to finish.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Aggregated usage of a process and all of its descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySample {
    /// Summed CPU usage at the last sample, in percent of one core.
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub peak_memory_bytes: u64,
    pub samples: u32,
}

impl TelemetrySample {
    fn record(&mut self, cpu_percent: f32, memory_bytes: u64) {
        self.cpu_percent = cpu_percent;
        self.memory_bytes = memory_bytes;
        self.peak_memory_bytes = self.peak_memory_bytes.max(memory_bytes);
        self.samples += 1;
    }
}

#[derive(Debug)]
pub struct Sampler {
    cell: Arc<Mutex<TelemetrySample>>,
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl Sampler {
    pub fn start(pid: u32, interval: Duration, join_timeout: Duration) -> Self {
        let cell = Arc::new(Mutex::new(TelemetrySample::default()));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&cell);
        let handle = thread::spawn(move || {
            let root = Pid::from_u32(pid);
            let mut system = System::new();
            loop {
                if let Some((cpu, memory)) = sample_tree(&mut system, root)
                    && let Ok(mut latest) = shared.lock()
                {
                    latest.record(cpu, memory);
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = done_tx.send(());
        });
        Self {
            cell,
            stop_tx,
            done_rx,
            handle: Some(handle),
            join_timeout,
        }
    }

    pub fn latest(&self) -> TelemetrySample {
        self.cell.lock().map(|s| *s).unwrap_or_default()
    }

    /// Stop sampling and return the final aggregate.
    pub fn stop(mut self) -> TelemetrySample {
        let _ = self.stop_tx.send(());
        match self.done_rx.recv_timeout(self.join_timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take()
                    && handle.join().is_err()
                {
                    warn!("telemetry thread panicked");
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "telemetry thread did not stop in time; detaching"
                );
            }
        }
        let sample = self.latest();
        debug!(
            samples = sample.samples,
            peak_memory = %format_bytes(sample.peak_memory_bytes),
            "telemetry stopped"
        );
        sample
    }
}

/// Sum CPU and RSS over `root` and its descendants. `None` if `root` is gone.
fn sample_tree(system: &mut System, root: Pid) -> Option<(f32, u64)> {
    system.refresh_processes();
    let processes = system.processes();
    processes.get(&root)?;

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in processes {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut cpu = 0.0f32;
    let mut memory = 0u64;
    let mut seen: HashSet<Pid> = HashSet::new();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(process) = processes.get(&pid) {
            cpu += process.cpu_usage();
            memory += process.memory();
        }
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }
    Some((cpu, memory))
}

pub fn format_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0B".to_string();
    }
    let mut num = value as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if num < 1024.0 {
            return format!("{num:.1}{unit}");
        }
        num /= 1024.0;
    }
    format!("{num:.1}{}", UNITS[UNITS.len() - 1])
}
