//! Per-second runtime accrual.
//!
//! While a pet is on screen its owner earns one second of run time per
//! wall-clock second, credited through [`Store::tick_run_time`] so the
//! balance and the per-pet counter move together under the store's lock.
//! The loop is a cancellable background thread with the same stop-signal
//! discipline as the store's flush loop; subscribers get (total seconds,
//! active-pet seconds) after every tick for UI display.

use crate::logutil::escape_log;
use crate::store::Store;
use log::{debug, warn};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Callback invoked after every accrual tick.
pub type TickCallback = Box<dyn Fn(u64, u64) + Send + 'static>;

/// Tracks runtime for the currently active (user, pet) pair.
pub struct RuntimeTracker {
    store: Arc<Store>,
    interval: Duration,
    callbacks: Arc<Mutex<Vec<TickCallback>>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeTracker {
    pub fn new(store: Arc<Store>) -> Self {
        RuntimeTracker {
            store,
            interval: Duration::from_secs(1),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            stop_tx: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Tick cadence override, used by tests.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Subscribe to tick events. Callbacks outlive start/stop cycles.
    pub fn subscribe(&self, callback: TickCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Begin accruing for `username`'s active `pet`. A second call while
    /// running is ignored, matching the one-active-pet UI model.
    pub fn start(&self, username: &str, pet: &str) {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        *self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);

        let store = Arc::clone(&self.store);
        let callbacks = Arc::clone(&self.callbacks);
        let username = username.to_string();
        let pet = pet.to_string();
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name("runtime-tracker".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        match store.tick_run_time(&username, &pet) {
                            Ok((total, pet_seconds)) => {
                                let cbs = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                                for cb in cbs.iter() {
                                    cb(total, pet_seconds);
                                }
                            }
                            Err(e) => {
                                // Unknown user after a logout race; keep ticking.
                                debug!("accrual tick skipped for {}: {}", escape_log(&username), e);
                            }
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        match spawned {
            Ok(handle) => *thread = Some(handle),
            Err(e) => warn!("runtime tracker thread failed to start: {}", e),
        }
    }

    /// Stop accruing. Bounded: the loop observes the signal within one tick.
    pub fn stop(&self) {
        let tx = self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("runtime tracker thread panicked");
            }
        }
    }
}

impl Drop for RuntimeTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Format a second count as `HH:MM:SS` for display.
pub fn format_hms(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::UserRecord;
    use crate::store::{Store, StoreConfig, DEFAULT_PET};
    use tempfile::tempdir;

    #[test]
    fn formats_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3661), "01:01:01");
        assert_eq!(format_hms(86399), "23:59:59");
    }

    #[test]
    fn accrues_while_running_and_stops_cleanly() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.flush_interval = Duration::from_secs(120);
        let store = Arc::new(Store::open(config).unwrap());
        store
            .upsert_user("alice", UserRecord::new("h".into(), "q".into(), "a".into()))
            .unwrap();

        let tracker =
            RuntimeTracker::new(Arc::clone(&store)).with_interval(Duration::from_millis(5));
        tracker.start("alice", DEFAULT_PET);
        std::thread::sleep(Duration::from_millis(80));
        tracker.stop();

        let total_after_stop = store.get_user("alice").unwrap().total_run_time;
        assert!(total_after_stop > 0);

        // No further accrual once stopped.
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get_user("alice").unwrap().total_run_time, total_after_stop);
    }

    #[test]
    fn callbacks_observe_ticks() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.flush_interval = Duration::from_secs(120);
        let store = Arc::new(Store::open(config).unwrap());
        store
            .upsert_user("alice", UserRecord::new("h".into(), "q".into(), "a".into()))
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker =
            RuntimeTracker::new(Arc::clone(&store)).with_interval(Duration::from_millis(5));
        tracker.subscribe(Box::new(move |total, pet| {
            sink.lock().unwrap().push((total, pet));
        }));
        tracker.start("alice", DEFAULT_PET);
        std::thread::sleep(Duration::from_millis(60));
        tracker.stop();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        let (total, pet) = seen[0];
        assert_eq!(total, pet);
    }
}
