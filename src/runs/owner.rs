use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// The process that started a run, stored in the run's config as `owner`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunOwner {
    pub pid: u32,
    pub host: Option<String>,
    /// Process start time in seconds since the epoch, as `sysinfo` reports it.
    pub process_started: u64,
}

impl RunOwner {
    pub fn current() -> Self {
        let pid = std::process::id();
        Self {
            pid,
            host: System::host_name(),
            process_started: process_start_time(pid).unwrap_or(0),
        }
    }

    /// Reads the owner back from a run config. Runs written before owners were
    /// recorded have none.
    pub fn from_config(config: Option<&serde_json::Value>) -> Option<Self> {
        let owner = config?.get("owner")?;
        serde_json::from_value(owner.clone()).ok()
    }

    /// True only when the owning process is known to be gone: same host, and the pid
    /// is either free or taken by a process started at another time. A run owned by
    /// another host is never considered dead.
    pub fn is_dead(&self) -> bool {
        if self.host.is_some() && self.host != System::host_name() {
            return false;
        }
        match process_start_time(self.pid) {
            Some(started) => started != self.process_started,
            None => true,
        }
    }
}

fn process_start_time(pid: u32) -> Option<u64> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system.process(pid).map(|process| process.start_time())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_process_is_alive() {
        assert!(!RunOwner::current().is_dead());
    }

    #[test]
    fn reused_pid_is_dead() {
        let mut owner = RunOwner::current();
        owner.process_started += 1;
        assert!(owner.is_dead());
    }

    #[test]
    fn other_host_is_never_dead() {
        let mut owner = RunOwner::current();
        owner.process_started += 1;
        owner.host = Some("elsewhere.invalid".into());
        assert!(!owner.is_dead());
    }

    #[test]
    fn reads_owner_from_run_config() {
        let owner = RunOwner::current();
        let config = json!({ "mode": "live", "owner": owner });
        assert_eq!(RunOwner::from_config(Some(&config)), Some(owner));
        assert_eq!(RunOwner::from_config(Some(&json!({ "mode": "batch" }))), None);
        assert_eq!(RunOwner::from_config(None), None);
    }
}
