use crate::error::{SampleError, SourceError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessStatus, RefreshKind, System};

/// Where the watcher and the samplers get their view of the running processes.
pub trait ProcessSource: Send + Sync {
    /// Pids of every live process right now. Threads and zombies are not processes.
    fn list_live_processes(&self) -> Result<HashSet<u32>, SourceError>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Total CPU time (user + system) consumed by the process so far.
    fn cpu_time(&self, pid: u32) -> Result<Duration, SampleError>;

    fn memory_usage(&self, pid: u32) -> Result<u64, SampleError>;

    fn virtual_memory(&self, pid: u32) -> Result<u64, SampleError>;

    fn thread_count(&self, pid: u32) -> Result<u64, SampleError>;
}

/// A pid paired with the source it was observed through.
///
/// The handle does not own the process: once the process exits every metric
/// read fails with [`SampleError::ProcessGone`].
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    source: Arc<dyn ProcessSource>,
}

impl ProcessHandle {
    pub fn new(pid: u32, source: Arc<dyn ProcessSource>) -> Self {
        Self { pid, source }
    }

    pub fn system(pid: u32) -> Self {
        Self::new(pid, Arc::new(SystemSource::new()))
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.source.is_alive(self.pid)
    }

    pub fn cpu_time(&self) -> Result<Duration, SampleError> {
        self.source.cpu_time(self.pid)
    }

    pub fn memory_usage(&self) -> Result<u64, SampleError> {
        self.source.memory_usage(self.pid)
    }

    pub fn virtual_memory(&self) -> Result<u64, SampleError> {
        self.source.virtual_memory(self.pid)
    }

    pub fn thread_count(&self) -> Result<u64, SampleError> {
        self.source.thread_count(self.pid)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

/// [`ProcessSource`] over the real operating system.
///
/// Snapshots come from `sysinfo`; on Linux the per-process metrics are read
/// from `/proc` through `procfs`.
pub struct SystemSource {
    system: RwLock<System>,
}

impl SystemSource {
    pub fn new() -> Self {
        // Start with empty system, populated on every snapshot
        Self {
            system: RwLock::new(System::new()),
        }
    }

    fn refresh(&self, kind: ProcessRefreshKind) -> parking_lot::RwLockWriteGuard<'_, System> {
        let mut system = self.system.write();
        // Rebuild from scratch: sysinfo keeps terminated processes around otherwise
        *system = System::new_with_specifics(RefreshKind::new().with_processes(kind));
        system
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

fn is_exited(status: ProcessStatus) -> bool {
    matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

impl ProcessSource for SystemSource {
    fn list_live_processes(&self) -> Result<HashSet<u32>, SourceError> {
        let system = self.refresh(ProcessRefreshKind::new());

        let pids: HashSet<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none() && !is_exited(process.status()))
            .map(|(pid, _)| pid.as_u32())
            .collect();

        // There is always at least the current process
        if pids.is_empty() {
            return Err(SourceError::Snapshot("no processes listed".to_string()));
        }

        Ok(pids)
    }

    #[cfg(target_os = "linux")]
    fn is_alive(&self, pid: u32) -> bool {
        linux::open(pid)
            .and_then(|process| linux::stat(pid, &process))
            .map(|stat| !matches!(stat.state, 'Z' | 'X' | 'x'))
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_alive(&self, pid: u32) -> bool {
        let system = self.refresh(ProcessRefreshKind::new());
        system
            .process(sysinfo::Pid::from_u32(pid))
            .map(|process| !is_exited(process.status()))
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    fn cpu_time(&self, pid: u32) -> Result<Duration, SampleError> {
        let stat = linux::open(pid).and_then(|process| linux::stat(pid, &process))?;
        let ticks = stat.utime + stat.stime;
        let per_second = procfs::ticks_per_second().max(1);
        Ok(Duration::from_secs_f64(ticks as f64 / per_second as f64))
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_time(&self, _pid: u32) -> Result<Duration, SampleError> {
        Err(SampleError::Unsupported("per-process CPU time"))
    }

    #[cfg(target_os = "linux")]
    fn memory_usage(&self, pid: u32) -> Result<u64, SampleError> {
        let statm = linux::open(pid).and_then(|process| linux::statm(pid, &process))?;
        Ok(statm.resident * procfs::page_size())
    }

    #[cfg(not(target_os = "linux"))]
    fn memory_usage(&self, pid: u32) -> Result<u64, SampleError> {
        let system = self.refresh(ProcessRefreshKind::new().with_memory());
        system
            .process(sysinfo::Pid::from_u32(pid))
            .map(|process| process.memory())
            .ok_or(SampleError::ProcessGone(pid))
    }

    #[cfg(target_os = "linux")]
    fn virtual_memory(&self, pid: u32) -> Result<u64, SampleError> {
        let statm = linux::open(pid).and_then(|process| linux::statm(pid, &process))?;
        Ok(statm.size * procfs::page_size())
    }

    #[cfg(not(target_os = "linux"))]
    fn virtual_memory(&self, pid: u32) -> Result<u64, SampleError> {
        let system = self.refresh(ProcessRefreshKind::new().with_memory());
        system
            .process(sysinfo::Pid::from_u32(pid))
            .map(|process| process.virtual_memory())
            .ok_or(SampleError::ProcessGone(pid))
    }

    #[cfg(target_os = "linux")]
    fn thread_count(&self, pid: u32) -> Result<u64, SampleError> {
        let stat = linux::open(pid).and_then(|process| linux::stat(pid, &process))?;
        Ok(stat.num_threads.max(0) as u64)
    }

    #[cfg(not(target_os = "linux"))]
    fn thread_count(&self, _pid: u32) -> Result<u64, SampleError> {
        Err(SampleError::Unsupported("thread count"))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use crate::error::SampleError;
    use procfs::process::{Process, Stat, StatM};
    use procfs::ProcError;

    fn convert(pid: u32, err: ProcError) -> SampleError {
        match err {
            ProcError::NotFound(_) => SampleError::ProcessGone(pid),
            other => SampleError::transient(pid, other),
        }
    }

    pub(super) fn open(pid: u32) -> Result<Process, SampleError> {
        let raw = i32::try_from(pid).map_err(|_| SampleError::ProcessGone(pid))?;
        Process::new(raw).map_err(|e| convert(pid, e))
    }

    pub(super) fn stat(pid: u32, process: &Process) -> Result<Stat, SampleError> {
        process.stat().map_err(|e| convert(pid, e))
    }

    pub(super) fn statm(pid: u32, process: &Process) -> Result<StatM, SampleError> {
        process.statm().map_err(|e| convert(pid, e))
    }
}
