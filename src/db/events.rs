//! Event bus and modification debouncing.
//!
//! The database publishes its lifecycle through a small subscriber
//! bus. `Modified` is special: it is debounced through a single-shot
//! 150 ms timer so that a burst of edits produces one event (one
//! autosave per burst, not one per keystroke). Arming the timer is
//! idempotent within its interval.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

/// Debounce interval of the `Modified` event.
pub const MODIFIED_DEBOUNCE: Duration = Duration::from_millis(150);

/// Lifecycle notifications published by a database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseEvent {
    /// A container was read into the database.
    Opened,
    /// The modified flag transitioned to clean after a save or open.
    Saved,
    /// Unsaved changes were dropped.
    Discarded,
    /// Data changed; debounced and coalesced.
    Modified,
    /// A UI-only or derived-only change occurred; no save required.
    NonDataChanged,
    /// The file binding moved.
    FilePathChanged {
        /// Previous binding.
        old: Option<PathBuf>,
        /// New binding.
        new: Option<PathBuf>,
    },
    /// The on-disk file changed. `external` is true when the change
    /// was detected by the save-time sentinel rather than the watcher.
    FileChanged {
        /// Whether a foreign writer is known to have touched the file.
        external: bool,
    },
    /// The derived tag list was refreshed.
    TagListUpdated,
}

/// Identifier of one subscription, for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&DatabaseEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
}

/// Cloneable handle to a database's subscriber list.
///
/// Publication happens on whichever thread calls [`EventBus::emit`];
/// per publisher, delivery is in program order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for every event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DatabaseEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Removes a previously registered callback.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Delivers `event` to every subscriber.
    pub fn emit(&self, event: &DatabaseEvent) {
        // Snapshot outside the callback invocations so subscribers may
        // re-enter the bus.
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(event);
        }
    }
}

enum DebounceCommand {
    Arm,
    Disarm,
    Shutdown,
}

/// Single-shot debounce timer for the `Modified` event.
///
/// Owns a timer thread; `arm` starts the interval if it is not already
/// running and is otherwise a no-op, `disarm` cancels it. On expiry
/// exactly one `Modified` is published.
pub struct ModifiedDebouncer {
    tx: mpsc::Sender<DebounceCommand>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
}

impl ModifiedDebouncer {
    /// Spawns the timer thread publishing to `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self::with_interval(bus, MODIFIED_DEBOUNCE)
    }

    /// Spawns the timer thread with an explicit interval.
    #[must_use]
    pub fn with_interval(bus: EventBus, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("modified-debounce".into())
            .spawn(move || run_debounce(&rx, &bus, interval))
            .expect("spawning the debounce thread succeeds");
        Self {
            tx,
            worker: Some(worker),
            interval,
        }
    }

    /// Configured debounce interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the interval if not already armed.
    pub fn arm(&self) {
        let _ = self.tx.send(DebounceCommand::Arm);
    }

    /// Cancels a pending interval, if any.
    pub fn disarm(&self) {
        let _ = self.tx.send(DebounceCommand::Disarm);
    }
}

impl Drop for ModifiedDebouncer {
    fn drop(&mut self) {
        let _ = self.tx.send(DebounceCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_debounce(rx: &mpsc::Receiver<DebounceCommand>, bus: &EventBus, interval: Duration) {
    loop {
        match rx.recv() {
            Ok(DebounceCommand::Arm) => {
                let deadline = Instant::now() + interval;
                loop {
                    let now = Instant::now();
                    if now >= deadline {
                        bus.emit(&DatabaseEvent::Modified);
                        break;
                    }
                    match rx.recv_timeout(deadline - now) {
                        // Re-arming within the interval does not extend it.
                        Ok(DebounceCommand::Arm) => {}
                        Ok(DebounceCommand::Disarm) => break,
                        Ok(DebounceCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            return;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            bus.emit(&DatabaseEvent::Modified);
                            break;
                        }
                    }
                }
            }
            Ok(DebounceCommand::Disarm) => {}
            Ok(DebounceCommand::Shutdown) | Err(_) => {
                debug!("modified debounce timer shutting down");
                return;
            }
        }
    }
}
