#[cfg(all(test, target_os = "linux"))]
mod tests {
    use crate::config::{ExportConfig, WatcherConfig};
    use crate::dataset::ProcessDataSet;
    use crate::export::ExporterRegistry;
    use crate::metrics::{AttributeDataSet, CpuDataSet, MemoryDataSet};
    use crate::process::{ProcessHandle, SystemSource};
    use crate::watcher::ProcessWatcher;
    use std::collections::HashSet;
    use std::fs;
    use std::process::{Child, Command, Stdio};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    const SLEEP_INTERVAL: Duration = Duration::from_millis(200);

    fn spawn_sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn sleep")
    }

    fn kill(mut child: Child) {
        let _ = child.kill();
        let _ = child.wait();
    }

    /// Waits until `pid` comes out of `events` or `timeout` elapses.
    fn wait_for_pid(events: &mpsc::Receiver<u32>, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(seen) if seen == pid => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    fn samplers() -> Vec<Box<dyn AttributeDataSet>> {
        vec![Box::new(CpuDataSet::new()), Box::new(MemoryDataSet::new())]
    }

    fn record_frames(frame_count: usize, delay: Duration) -> ProcessDataSet {
        let mut child = spawn_sleeper();
        let mut data_set = ProcessDataSet::new(ProcessHandle::system(child.id()));
        for sampler in samplers() {
            assert!(data_set.add_attribute_data_set(sampler), "duplicate attribute data set type");
        }

        for i in 0..frame_count {
            if let Ok(Some(status)) = child.try_wait() {
                panic!("process already exited with {}", status);
            }
            if i > 0 {
                thread::sleep(delay);
            }
            assert!(data_set.record(), "failed to record process data");
        }

        kill(child);
        data_set
    }

    #[test]
    fn test_watcher_reports_subprocess() {
        let watcher = ProcessWatcher::new(
            Arc::new(SystemSource::new()),
            WatcherConfig::new().with_sleep_interval(SLEEP_INTERVAL),
        );

        let (new_tx, new_rx) = mpsc::channel();
        let (stopped_tx, stopped_rx) = mpsc::channel();
        let new_tx = parking_lot::Mutex::new(new_tx);
        let stopped_tx = parking_lot::Mutex::new(stopped_tx);
        let added = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let seen = added.clone();
        let on_new = watcher.on_new_process(move |process| {
            seen.lock().insert(process.id());
            let _ = new_tx.lock().send(process.id());
        });
        let on_stopped = watcher.on_process_stopped(move |pid| {
            let _ = stopped_tx.lock().send(pid);
        });

        let session = watcher.session().unwrap();
        let child = spawn_sleeper();
        let pid = child.id();
        assert!(watcher.is_watching());

        if !wait_for_pid(&new_rx, pid, SLEEP_INTERVAL * 5) {
            assert!(added.lock().contains(&pid), "new process event did not fire for {}", pid);
        }

        kill(child);
        assert!(
            wait_for_pid(&stopped_rx, pid, SLEEP_INTERVAL * 5),
            "process stopped event did not fire for {}",
            pid
        );

        assert!(watcher.unsubscribe(on_new));
        assert!(watcher.unsubscribe(on_stopped));
        session.close().unwrap();
        assert!(!watcher.is_watching());
    }

    #[test]
    fn test_process_data_set_basic() {
        let data_set = record_frames(1, Duration::from_secs(1));

        let table = data_set.compile();
        assert_ne!(table.row_count(), 0);
        assert_eq!(table.columns, vec!["cpu_percent", "memory_bytes"]);

        let memory = table.column(MemoryDataSet::KIND).unwrap();
        assert!(table.rows[0].values[memory].is_some(), "resident memory missing");
    }

    #[test]
    fn test_process_data_set_exporting() {
        let data_set = record_frames(5, Duration::from_secs(1));
        assert_eq!(data_set.compile().row_count(), 5);

        let dir = tempfile::tempdir().unwrap();
        let registry = ExporterRegistry::builtin(ExportConfig::new().with_output_dir(dir.path()));
        let mut data_set = data_set;

        let mut paths = Vec::new();
        for name in registry.discover() {
            let exporter = registry.instantiate(name).unwrap();
            paths.push(data_set.export(exporter.as_ref()).ok());
        }

        assert!(!paths.is_empty());
        assert!(!paths.contains(&None), "an exporter failed: {:?}", data_set.last_export_error());

        let unique: HashSet<_> = paths.iter().flatten().collect();
        assert_eq!(unique.len(), paths.len());

        let csv = paths.iter().flatten().find(|p| p.extension().is_some_and(|e| e == "csv")).unwrap();
        assert_eq!(fs::read_to_string(csv).unwrap().lines().count(), 6);

        for path in paths.into_iter().flatten() {
            fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_record_after_exit() {
        let child = spawn_sleeper();
        let mut data_set = ProcessDataSet::new(ProcessHandle::system(child.id()));
        data_set.add_attribute_data_set(Box::new(MemoryDataSet::new()));
        assert!(data_set.record());

        kill(child);
        assert!(!data_set.record());
        assert_eq!(data_set.frame_count(), 1);
    }
}
