//! Polling process watcher.
//!
//! A background thread takes a full process snapshot every sleep interval,
//! diffs it against the previous one and tells subscribers which pids appeared
//! and which disappeared. Processes that start and exit between two polls are
//! never seen.

use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::process::{ProcessHandle, ProcessSource, SystemSource};
use crate::subscribers::Subscribers;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type NewProcessCallback = dyn Fn(&ProcessHandle) + Send + Sync;
type ProcessStoppedCallback = dyn Fn(u32) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Watching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherEvent {
    NewProcess,
    ProcessStopped,
}

/// Token returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: WatcherEvent,
    id: u64,
}

/// Pids that appeared and disappeared between two snapshots, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessDiff {
    pub started: Vec<u32>,
    pub stopped: Vec<u32>,
}

impl ProcessDiff {
    pub fn between(previous: &HashSet<u32>, current: &HashSet<u32>) -> Self {
        let mut started: Vec<u32> = current.difference(previous).copied().collect();
        let mut stopped: Vec<u32> = previous.difference(current).copied().collect();
        started.sort_unstable();
        stopped.sort_unstable();
        Self { started, stopped }
    }

    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Sleeps for `timeout` or until stopped. Returns true once stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

struct Worker {
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

struct Lifecycle {
    ref_count: usize,
    state: WatcherState,
    worker: Option<Worker>,
}

struct Shared {
    source: Arc<dyn ProcessSource>,
    sleep_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    new_process: Subscribers<NewProcessCallback>,
    process_stopped: Subscribers<ProcessStoppedCallback>,
}

/// Reference counted process watcher.
///
/// Cloning is cheap and every clone drives the same polling thread: the
/// thread starts on the first [`start_watching`](Self::start_watching) and
/// stops when the matching number of
/// [`stop_watching`](Self::stop_watching) calls brings the count back to zero.
///
/// Callbacks run on the polling thread, in subscription order, with all
/// new-process notifications of a tick delivered before its stopped-process
/// notifications. Slow callbacks delay detection for everyone.
#[derive(Clone)]
pub struct ProcessWatcher {
    shared: Arc<Shared>,
}

impl ProcessWatcher {
    pub fn new(source: Arc<dyn ProcessSource>, config: WatcherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                sleep_interval: config.sleep_interval,
                lifecycle: Mutex::new(Lifecycle {
                    ref_count: 0,
                    state: WatcherState::Stopped,
                    worker: None,
                }),
                new_process: Subscribers::new(),
                process_stopped: Subscribers::new(),
            }),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemSource::new()), WatcherConfig::default())
    }

    pub fn sleep_interval(&self) -> Duration {
        self.shared.sleep_interval
    }

    pub fn state(&self) -> WatcherState {
        self.shared.lifecycle.lock().state
    }

    pub fn is_watching(&self) -> bool {
        self.state() == WatcherState::Watching
    }

    pub fn ref_count(&self) -> usize {
        self.shared.lifecycle.lock().ref_count
    }

    /// Takes a reference on the polling thread, spawning it if this is the first one.
    ///
    /// Processes already running at that point are the baseline and are not
    /// reported as new.
    pub fn start_watching(&self) -> Result<(), WatcherError> {
        let mut lifecycle = self.shared.lifecycle.lock();

        if lifecycle.ref_count == 0 {
            let baseline = match self.shared.source.list_live_processes() {
                Ok(pids) => Some(pids),
                Err(err) => {
                    warn!(error = %err, "no baseline snapshot, the first successful poll will be used");
                    None
                }
            };

            let stop = Arc::new(StopSignal::new());
            let thread = thread::Builder::new()
                .name("procwatch-poller".to_string())
                .spawn({
                    let shared = Arc::downgrade(&self.shared);
                    let stop = stop.clone();
                    let interval = self.shared.sleep_interval;
                    move || poll_loop(shared, stop, baseline, interval)
                })
                .map_err(WatcherError::Spawn)?;

            lifecycle.worker = Some(Worker { stop, thread });
            lifecycle.state = WatcherState::Watching;
            info!(
                interval_ms = self.shared.sleep_interval.as_millis() as u64,
                "process watcher started"
            );
        }

        lifecycle.ref_count += 1;
        Ok(())
    }

    /// Releases one reference; the last one stops and joins the polling thread.
    ///
    /// A callback currently being dispatched is allowed to finish. Calling
    /// this more often than [`start_watching`](Self::start_watching) leaves
    /// the watcher stopped and returns [`WatcherError::NotWatching`].
    pub fn stop_watching(&self) -> Result<(), WatcherError> {
        let worker = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.ref_count == 0 {
                warn!("stop_watching called more often than start_watching");
                return Err(WatcherError::NotWatching);
            }

            lifecycle.ref_count -= 1;
            if lifecycle.ref_count > 0 {
                return Ok(());
            }

            lifecycle.state = WatcherState::Stopped;
            let worker = lifecycle.worker.take();
            // Before releasing the lock, so a new start never overlaps the old poller
            if let Some(worker) = &worker {
                worker.stop.stop();
            }
            worker
        };

        if let Some(worker) = worker {
            // A callback may stop the watcher from the polling thread itself
            if worker.thread.thread().id() != thread::current().id()
                && worker.thread.join().is_err()
            {
                error!("polling thread panicked");
            }
            info!("process watcher stopped");
        }

        Ok(())
    }

    /// Starts watching for as long as the returned session lives.
    pub fn session(&self) -> Result<WatchSession, WatcherError> {
        self.start_watching()?;
        Ok(WatchSession {
            watcher: self.clone(),
            released: false,
        })
    }

    pub fn on_new_process<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProcessHandle) + Send + Sync + 'static,
    {
        Subscription {
            event: WatcherEvent::NewProcess,
            id: self.shared.new_process.add(Arc::new(callback)),
        }
    }

    pub fn on_process_stopped<F>(&self, callback: F) -> Subscription
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Subscription {
            event: WatcherEvent::ProcessStopped,
            id: self.shared.process_stopped.add(Arc::new(callback)),
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        match subscription.event {
            WatcherEvent::NewProcess => self.shared.new_process.remove(subscription.id),
            WatcherEvent::ProcessStopped => self.shared.process_stopped.remove(subscription.id),
        }
    }

    pub fn subscriber_count(&self, event: WatcherEvent) -> usize {
        match event {
            WatcherEvent::NewProcess => self.shared.new_process.len(),
            WatcherEvent::ProcessStopped => self.shared.process_stopped.len(),
        }
    }
}

impl Default for ProcessWatcher {
    fn default() -> Self {
        Self::system()
    }
}

/// Keeps a [`ProcessWatcher`] running until closed or dropped.
#[must_use = "dropping the session stops watching"]
pub struct WatchSession {
    watcher: ProcessWatcher,
    released: bool,
}

impl WatchSession {
    pub fn watcher(&self) -> &ProcessWatcher {
        &self.watcher
    }

    pub fn close(mut self) -> Result<(), WatcherError> {
        self.released = true;
        self.watcher.stop_watching()
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.watcher.stop_watching() {
                warn!(error = %err, "failed to release watch session");
            }
        }
    }
}

fn poll_loop(
    shared: Weak<Shared>,
    stop: Arc<StopSignal>,
    mut known: Option<HashSet<u32>>,
    interval: Duration,
) {
    debug!("polling loop running");
    while !stop.wait(interval) {
        // Every watcher handle is gone
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.tick(&mut known);
    }
    debug!("polling loop exited");
}

impl Shared {
    fn tick(&self, known: &mut Option<HashSet<u32>>) {
        let snapshot = match self.source.list_live_processes() {
            Ok(pids) => pids,
            Err(err) => {
                warn!(error = %err, "skipping poll");
                return;
            }
        };

        let Some(previous) = known.as_ref() else {
            debug!(processes = snapshot.len(), "baseline snapshot taken");
            *known = Some(snapshot);
            return;
        };

        let diff = ProcessDiff::between(previous, &snapshot);
        *known = Some(snapshot);
        if diff.is_empty() {
            return;
        }

        debug!(
            started = diff.started.len(),
            stopped = diff.stopped.len(),
            "process set changed"
        );

        for &pid in &diff.started {
            let handle = ProcessHandle::new(pid, self.source.clone());
            dispatch(&self.new_process, WatcherEvent::NewProcess, pid, |cb| cb(&handle));
        }
        for &pid in &diff.stopped {
            dispatch(&self.process_stopped, WatcherEvent::ProcessStopped, pid, |cb| cb(pid));
        }
    }
}

/// Calls every subscriber; a panicking one is logged and skipped.
fn dispatch<T: ?Sized>(
    subscribers: &Subscribers<T>,
    event: WatcherEvent,
    pid: u32,
    call: impl Fn(&T),
) {
    for callback in subscribers.snapshot() {
        if panic::catch_unwind(AssertUnwindSafe(|| call(callback.as_ref()))).is_err() {
            error!(?event, pid, "subscriber panicked");
        }
    }
}
