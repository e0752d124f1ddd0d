//! Client process exit detection
//!
//! Children of the server are reaped with `waitpid(WNOHANG)`. Client pids that
//! are not our children cannot be waited on, so they are probed with signal 0
//! and count as exited once the kernel reports `ESRCH`.

use std::collections::BTreeSet;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ProcessWatch {
    pids: BTreeSet<u32>,
}

impl ProcessWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `pid`. Returns `false` for pids that cannot name a
    /// single process (0, or beyond `pid_t`).
    pub fn watch(&mut self, pid: u32) -> bool {
        if to_pid(pid).is_none() {
            warn!("Refusing to watch pid {}", pid);
            return false;
        }
        if self.pids.insert(pid) {
            debug!("Watching pid {}", pid);
        }
        true
    }

    pub fn unwatch(&mut self, pid: u32) {
        if self.pids.remove(&pid) {
            debug!("No longer watching pid {}", pid);
        }
    }

    pub fn is_watched(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn retain(&mut self, keep: impl FnMut(&u32) -> bool) {
        self.pids.retain(keep);
    }

    /// Remove and return every watched pid that has exited, in ascending order
    pub fn reap(&mut self) -> Vec<u32> {
        let exited: Vec<u32> = self.pids.iter().copied().filter(|&pid| has_exited(pid)).collect();
        for pid in &exited {
            self.pids.remove(pid);
        }
        exited
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

fn has_exited(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };

    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => {
            debug!("Child {} exited with status {}", pid, code);
            true
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => {
            debug!("Child {} killed by {:?}", pid, signal);
            true
        }
        Ok(_) => false,
        // Not our child: fall back to a liveness probe
        Err(Errno::ECHILD) => matches!(kill(pid, None), Err(Errno::ESRCH)),
        Err(e) => {
            warn!("waitpid({}) failed: {}", pid, e);
            false
        }
    }
}
