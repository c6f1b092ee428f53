mod types;

pub use types::{ResourceUsage, UsageSample};

use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessesToUpdate, System};

const MAX_SAMPLES: usize = 10_000;

/// Source of the resource-usage summary attached to a finished run.
pub trait UsageMonitor: Send + Sync {
    fn sample(&self);
    fn reset(&self);
    fn summary(&self) -> ResourceUsage;
}

/// Samples this process through `sysinfo`.
pub struct ProcessMonitor {
    inner: Arc<Mutex<MonitorState>>,
}

struct MonitorState {
    samples: Vec<UsageSample>,
    system: System,
    pid: Pid,
}

impl MonitorState {
    fn read(&mut self) -> UsageSample {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        match self.system.process(pid) {
            Some(process) => UsageSample {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => UsageSample::default(),
        }
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MonitorState {
                samples: Vec::new(),
                system,
                pid,
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MonitorState) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ProcessMonitor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl UsageMonitor for ProcessMonitor {
    fn sample(&self) {
        self.with_state(|state| {
            let reading = state.read();
            if state.samples.len() >= MAX_SAMPLES {
                state.samples.remove(0);
            }
            state.samples.push(reading);
        });
    }

    fn reset(&self) {
        self.with_state(|state| {
            state.samples.clear();
            let _ = state.read();
        });
    }

    fn summary(&self) -> ResourceUsage {
        self.with_state(|state| ResourceUsage::from_samples(&state.samples))
    }
}
