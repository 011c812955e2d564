//! Scriptable [`ProcessSource`] for unit tests.

use crate::error::{SampleError, SourceError};
use crate::process::ProcessSource;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct MockProcess {
    cpu_time: Duration,
    memory: u64,
    virtual_memory: u64,
    threads: u64,
    /// Metric reads fail transiently while set.
    flaky: bool,
}

#[derive(Default)]
struct State {
    processes: HashMap<u32, MockProcess>,
    snapshot_unavailable: bool,
    snapshots_taken: usize,
}

#[derive(Default)]
pub(crate) struct MockSource {
    state: Mutex<State>,
}

impl MockSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn(&self, pid: u32) {
        self.state
            .lock()
            .processes
            .insert(pid, MockProcess { threads: 1, ..Default::default() });
    }

    pub(crate) fn kill(&self, pid: u32) {
        self.state.lock().processes.remove(&pid);
    }

    /// Kills `gone` and spawns `new` atomically, so one snapshot sees both changes.
    pub(crate) fn exchange(&self, gone: u32, new: u32) {
        let mut state = self.state.lock();
        state.processes.remove(&gone);
        state
            .processes
            .insert(new, MockProcess { threads: 1, ..Default::default() });
    }

    pub(crate) fn set_cpu_time(&self, pid: u32, cpu_time: Duration) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            process.cpu_time = cpu_time;
        }
    }

    pub(crate) fn set_memory(&self, pid: u32, bytes: u64) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            process.memory = bytes;
            process.virtual_memory = bytes * 4;
        }
    }

    pub(crate) fn set_flaky(&self, pid: u32, flaky: bool) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            process.flaky = flaky;
        }
    }

    pub(crate) fn set_snapshot_unavailable(&self, unavailable: bool) {
        self.state.lock().snapshot_unavailable = unavailable;
    }

    pub(crate) fn snapshots_taken(&self) -> usize {
        self.state.lock().snapshots_taken
    }

    fn read<T>(&self, pid: u32, f: impl FnOnce(&MockProcess) -> T) -> Result<T, SampleError> {
        let state = self.state.lock();
        let process = state.processes.get(&pid).ok_or(SampleError::ProcessGone(pid))?;
        if process.flaky {
            return Err(SampleError::transient(pid, "permission denied"));
        }
        Ok(f(process))
    }
}

impl ProcessSource for MockSource {
    fn list_live_processes(&self) -> Result<HashSet<u32>, SourceError> {
        let mut state = self.state.lock();
        state.snapshots_taken += 1;
        if state.snapshot_unavailable {
            return Err(SourceError::Snapshot("mock source offline".to_string()));
        }
        Ok(state.processes.keys().copied().collect())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().processes.contains_key(&pid)
    }

    fn cpu_time(&self, pid: u32) -> Result<Duration, SampleError> {
        self.read(pid, |p| p.cpu_time)
    }

    fn memory_usage(&self, pid: u32) -> Result<u64, SampleError> {
        self.read(pid, |p| p.memory)
    }

    fn virtual_memory(&self, pid: u32) -> Result<u64, SampleError> {
        self.read(pid, |p| p.virtual_memory)
    }

    fn thread_count(&self, pid: u32) -> Result<u64, SampleError> {
        self.read(pid, |p| p.threads)
    }
}
