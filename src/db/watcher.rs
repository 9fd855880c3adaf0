//! Polling observer of the bound database file.
//!
//! Watches the on-disk file for foreign mutations by polling its
//! metadata: every 30 seconds at rest, dropping to 1 second after a
//! change is seen until the file settles again. Detected changes are
//! published as `FileChanged { external: false }`; the save-time
//! sentinel is what reports `external: true`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use log::{debug, warn};

use super::events::{DatabaseEvent, EventBus};

/// Polling cadence while the file is quiet.
pub const WATCH_BASE_INTERVAL: Duration = Duration::from_secs(30);
/// Polling cadence right after a change was seen.
pub const WATCH_BURST_INTERVAL: Duration = Duration::from_secs(1);

enum WatchCommand {
    Pause,
    Resume,
    Stop,
}

/// File-change observer for one database.
pub struct FileWatcher {
    ctrl: Option<mpsc::Sender<WatchCommand>>,
    worker: Option<JoinHandle<()>>,
    base_interval: Duration,
    burst_interval: Duration,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWatcher {
    /// Creates a stopped watcher with the default cadence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctrl: None,
            worker: None,
            base_interval: WATCH_BASE_INTERVAL,
            burst_interval: WATCH_BURST_INTERVAL,
        }
    }

    /// Overrides the polling cadence. Takes effect on the next
    /// [`FileWatcher::start`].
    pub fn set_intervals(&mut self, base: Duration, burst: Duration) {
        self.base_interval = base;
        self.burst_interval = burst;
    }

    /// Whether a watch thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ctrl.is_some()
    }

    /// Starts watching `path`, replacing any previous watch.
    pub fn start(&mut self, path: PathBuf, bus: EventBus) {
        self.stop();

        let (tx, rx) = mpsc::channel();
        let base = self.base_interval;
        let burst = self.burst_interval;
        let worker = thread::Builder::new()
            .name("file-watcher".into())
            .spawn(move || watch_loop(&path, &rx, &bus, base, burst));

        match worker {
            Ok(handle) => {
                self.ctrl = Some(tx);
                self.worker = Some(handle);
            }
            Err(e) => warn!("unable to spawn file watcher thread: {e}"),
        }
    }

    /// Stops the watch thread, if any.
    pub fn stop(&mut self) {
        if let Some(ctrl) = self.ctrl.take() {
            let _ = ctrl.send(WatchCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Suppresses change events until [`FileWatcher::resume`].
    pub fn pause(&self) {
        if let Some(ctrl) = &self.ctrl {
            let _ = ctrl.send(WatchCommand::Pause);
        }
    }

    /// Re-enables change events. The baseline is re-read first, so
    /// changes made while paused are not reported.
    pub fn resume(&self) {
        if let Some(ctrl) = &self.ctrl {
            let _ = ctrl.send(WatchCommand::Resume);
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

type FileStamp = Option<(SystemTime, u64)>;

fn stat(path: &Path) -> FileStamp {
    let meta = fs::metadata(path).ok()?;
    let mtime = meta.modified().ok()?;
    Some((mtime, meta.len()))
}

fn watch_loop(
    path: &Path,
    rx: &mpsc::Receiver<WatchCommand>,
    bus: &EventBus,
    base: Duration,
    burst: Duration,
) {
    let mut last = stat(path);
    let mut paused = false;
    let mut interval = base;

    debug!("watching {} for external changes", path.display());
    loop {
        match rx.recv_timeout(interval) {
            Ok(WatchCommand::Pause) => paused = true,
            Ok(WatchCommand::Resume) => {
                paused = false;
                last = stat(path);
            }
            Ok(WatchCommand::Stop) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                let current = stat(path);
                if current == last {
                    interval = base;
                } else {
                    last = current;
                    interval = burst;
                    if !paused {
                        debug!("detected change of {}", path.display());
                        bus.emit(&DatabaseEvent::FileChanged { external: false });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn recording_bus() -> (EventBus, mpsc::Receiver<DatabaseEvent>) {
        let bus = EventBus::new();
        let (tx, rx) = channel();
        bus.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (bus, rx)
    }

    fn fast_watcher() -> FileWatcher {
        let mut watcher = FileWatcher::new();
        watcher.set_intervals(Duration::from_millis(10), Duration::from_millis(10));
        watcher
    }

    #[test]
    fn reports_a_change_to_the_watched_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cvlt");
        fs::write(&path, b"original").unwrap();

        let (bus, rx) = recording_bus();
        let mut watcher = fast_watcher();
        watcher.start(path.clone(), bus);

        thread::sleep(Duration::from_millis(50));
        fs::write(&path, b"externally rewritten").unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            DatabaseEvent::FileChanged { external: false }
        );
        watcher.stop();
    }

    #[test]
    fn paused_watcher_stays_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cvlt");
        fs::write(&path, b"original").unwrap();

        let (bus, rx) = recording_bus();
        let mut watcher = fast_watcher();
        watcher.start(path.clone(), bus);
        watcher.pause();

        thread::sleep(Duration::from_millis(50));
        fs::write(&path, b"changed while paused").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        // Resuming re-baselines, so the paused-era change stays silent.
        watcher.resume();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        fs::write(&path, b"changed after resume").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            DatabaseEvent::FileChanged { external: false }
        );
        watcher.stop();
    }

    #[test]
    fn stop_is_idempotent_and_ends_the_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cvlt");
        fs::write(&path, b"x").unwrap();

        let (bus, _rx) = recording_bus();
        let mut watcher = fast_watcher();
        watcher.start(path, bus);
        assert!(watcher.is_running());
        watcher.stop();
        assert!(!watcher.is_running());
        watcher.stop();
    }
}
