//! Communication watchdog (spec §4.G): a scheduler that tracks per-device
//! liveness, declares communication failure on timeout, and emits
//! restoration events.
//!
//! Grounded on `discovery::registry::Inner::cleanup`: a periodic sweep over
//! a `HashMap`, timeout-based state change, events collected while the lock
//! is held and only sent after it's dropped — exactly the ordering spec §5
//! requires ("Watchdog notifications are issued outside its internal
//! lock").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    timeout_secs: u64,
    last_success: Instant,
    in_fail: bool,
}

/// The two callbacks a caller registers (spec §4.G "Callbacks"). Neither is
/// invoked while the watchdog's internal lock is held.
#[async_trait::async_trait]
pub trait WatchdogCallbacks: Send + Sync {
    async fn on_failed(&self, uuid: &str);
    async fn on_restored(&self, uuid: &str);
}

struct Inner {
    entries: HashMap<String, Entry>,
    fast_mode: bool,
}

/// Per-device liveness tracker with a single background scan loop.
pub struct Watchdog {
    inner: RwLock<Inner>,
    callbacks: Arc<dyn WatchdogCallbacks>,
    scan_interval: Duration,
    wake: Notify,
    running: std::sync::atomic::AtomicBool,
}

impl Watchdog {
    pub fn new(callbacks: Arc<dyn WatchdogCallbacks>) -> Arc<Self> {
        Self::with_scan_interval(callbacks, DEFAULT_SCAN_INTERVAL)
    }

    pub fn with_scan_interval(callbacks: Arc<dyn WatchdogCallbacks>, scan_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                fast_mode: false,
            }),
            callbacks,
            scan_interval,
            wake: Notify::new(),
            running: std::sync::atomic::AtomicBool::new(true),
        })
    }

    /// Unit used to compare elapsed time against `timeout_secs`: normally
    /// seconds, but milliseconds in fast mode (spec §4.G "fast mode
    /// collapses the unit ... for synthetic acceleration in tests").
    fn timeout_unit(&self, fast_mode: bool) -> Duration {
        if fast_mode {
            Duration::from_millis(1)
        } else {
            Duration::from_secs(1)
        }
    }

    /// Spawns the background scan loop. Call once; the returned handle can
    /// be aborted on shutdown.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    async fn run(self: Arc<Self>) {
        while self.running.load(std::sync::atomic::Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(self.scan_interval) => {}
                _ = self.wake.notified() => {}
            }
            if !self.running.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
            self.scan_once().await;
        }
    }

    async fn scan_once(&self) {
        let now = Instant::now();
        let mut newly_failed = Vec::new();

        {
            let mut inner = self.inner.write().await;
            let fast_mode = inner.fast_mode;
            let unit = self.timeout_unit(fast_mode);
            for (uuid, entry) in inner.entries.iter_mut() {
                if entry.in_fail {
                    continue;
                }
                let elapsed = now.saturating_duration_since(entry.last_success);
                if elapsed > unit * entry.timeout_secs as u32 {
                    entry.in_fail = true;
                    newly_failed.push(uuid.clone());
                }
            }
        }

        for uuid in newly_failed {
            self.callbacks.on_failed(&uuid).await;
        }
    }

    pub async fn set_fast_mode(&self, fast: bool) {
        self.inner.write().await.fast_mode = fast;
        self.wake.notify_one();
    }

    /// `monitor` (spec §4.G). A zero timeout is a no-op: no failure is ever
    /// emitted for that device.
    pub async fn monitor(&self, uuid: impl Into<String>, timeout_secs: u64, initial_in_fail: bool) {
        if timeout_secs == 0 {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            uuid.into(),
            Entry {
                timeout_secs,
                last_success: Instant::now(),
                in_fail: initial_in_fail,
            },
        );
    }

    pub async fn stop_monitoring(&self, uuid: &str) {
        self.inner.write().await.entries.remove(uuid);
    }

    pub async fn is_monitored(&self, uuid: &str) -> bool {
        self.inner.read().await.entries.contains_key(uuid)
    }

    pub async fn is_failing(&self, uuid: &str) -> Option<bool> {
        self.inner.read().await.entries.get(uuid).map(|e| e.in_fail)
    }

    /// `pet` (spec §4.G / §8 idempotence: `pet(u); pet(u)` == `pet(u)`).
    pub async fn pet(&self, uuid: &str) {
        let was_failing = {
            let mut inner = self.inner.write().await;
            match inner.entries.get_mut(uuid) {
                Some(entry) => {
                    entry.last_success = Instant::now();
                    let was_failing = entry.in_fail;
                    entry.in_fail = false;
                    was_failing
                }
                None => return,
            }
        };
        if was_failing {
            self.callbacks.on_restored(uuid).await;
        }
    }

    /// `forceFail` (spec §4.G). Emits once; does not re-emit on the next
    /// periodic scan, since the entry is already marked failing (spec §9
    /// open question, resolved in favor of "emit once").
    pub async fn force_fail(&self, uuid: &str) {
        let should_emit = {
            let mut inner = self.inner.write().await;
            match inner.entries.get_mut(uuid) {
                Some(entry) if !entry.in_fail => {
                    entry.in_fail = true;
                    true
                }
                _ => false,
            }
        };
        if should_emit {
            self.callbacks.on_failed(uuid).await;
        }
    }

    /// `resetTimeout`: updates the timeout; if the device isn't currently
    /// failing, this also refreshes `last_success` (spec §4.G).
    pub async fn reset_timeout(&self, uuid: &str, new_timeout_secs: u64) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.entries.get_mut(uuid) {
            entry.timeout_secs = new_timeout_secs;
            if !entry.in_fail {
                entry.last_success = Instant::now();
            }
        }
    }

    /// `remainingForLPM` (spec §4.G): seconds remaining before `delaySecs`
    /// elapses since last success, or `-1` if expired or already failing.
    pub async fn remaining_for_lpm(&self, uuid: &str, delay_secs: i64) -> i32 {
        let inner = self.inner.read().await;
        let entry = match inner.entries.get(uuid) {
            Some(e) => e,
            None => return -1,
        };
        if entry.in_fail {
            return -1;
        }
        let elapsed_secs = Instant::now().saturating_duration_since(entry.last_success).as_millis() as i64 / 1000;
        let remaining = delay_secs - elapsed_secs;
        if remaining < 0 {
            -1
        } else {
            remaining as i32
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingCallbacks {
        failed: AtomicUsize,
        restored: AtomicUsize,
    }

    impl RecordingCallbacks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                failed: AtomicUsize::new(0),
                restored: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl WatchdogCallbacks for RecordingCallbacks {
        async fn on_failed(&self, _uuid: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_restored(&self, _uuid: &str) {
            self.restored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn zero_timeout_is_noop() {
        let cb = RecordingCallbacks::new();
        let wd = Watchdog::new(cb);
        wd.monitor("u1", 0, false).await;
        assert!(!wd.is_monitored("u1").await);
    }

    #[tokio::test]
    async fn pet_idempotent_wrt_callbacks() {
        let cb = RecordingCallbacks::new();
        let wd = Watchdog::new(cb.clone());
        wd.monitor("u1", 60, true).await;
        wd.pet("u1").await;
        wd.pet("u1").await;
        assert_eq!(cb.restored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_fail_emits_once() {
        let cb = RecordingCallbacks::new();
        let wd = Watchdog::new(cb.clone());
        wd.monitor("u1", 60, false).await;
        wd.force_fail("u1").await;
        wd.force_fail("u1").await;
        assert_eq!(cb.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remaining_for_lpm_boundaries() {
        let cb = RecordingCallbacks::new();
        let wd = Watchdog::new(cb);
        wd.monitor("u1", 120, false).await;
        let remaining = wd.remaining_for_lpm("u1", 120).await;
        assert!(remaining <= 120 && remaining >= 119);

        wd.force_fail("u1").await;
        assert_eq!(wd.remaining_for_lpm("u1", 120).await, -1);
    }

    #[tokio::test]
    async fn monitor_stop_monitor_restores_original_minus_last_success() {
        let cb = RecordingCallbacks::new();
        let wd = Watchdog::new(cb);
        wd.monitor("u1", 42, false).await;
        wd.stop_monitoring("u1").await;
        wd.monitor("u1", 42, false).await;
        assert!(wd.is_monitored("u1").await);
        assert_eq!(wd.is_failing("u1").await, Some(false));
    }

    #[tokio::test]
    async fn fast_mode_scan_detects_millisecond_timeout() {
        let cb = RecordingCallbacks::new();
        let wd = Watchdog::with_scan_interval(cb.clone(), Duration::from_millis(5));
        wd.set_fast_mode(true).await;
        wd.monitor("u1", 10, false).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        wd.scan_once().await;

        assert_eq!(wd.is_failing("u1").await, Some(true));
        assert_eq!(cb.failed.load(Ordering::SeqCst), 1);
    }
}
