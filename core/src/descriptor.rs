//! Descriptor handler (spec §4.D): keeps the allow-list and deny-list
//! descriptor files synchronized with remote URLs, gated before device
//! discovery is allowed to begin.
//!
//! Grounded on two shapes from the teacher: the retry-with-backoff loop
//! wrapping a fallible inner task (`device_manager::Device::task`, which
//! retries `task_inner` every 5s until it succeeds) and the periodic
//! cleanup-and-notify pattern in `discovery::registry::Inner::cleanup`
//! (collect events while holding a lock, send them after releasing it).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{CoreError, Result};

pub const BLACKLIST_SENTINEL: &str = "http://toBeReplaced";
const MIN_URL_LEN: usize = 9;
const INITIAL_DELAY: Duration = Duration::from_secs(15);
const DELAY_INCREMENT: Duration = Duration::from_secs(15);
const MAX_DELAY: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// A parsed descriptor record: metadata describing how to configure a
/// specific device model (spec glossary "Descriptor").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceDescriptor {
    pub device_class: String,
    pub model: String,
    pub config: serde_json::Value,
}

/// The out-of-core URL fetcher collaborator (spec §1). `download` writes to
/// `path`, respecting `timeout`; the returned status mirrors an HTTP status
/// code, with `0` meaning "no status but bytes were received" (spec §4.D
/// "on HTTP 200/0 and non-zero size").
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn download(&self, url: &str, path: &Path, timeout: Duration) -> std::io::Result<(u16, u64)>;
    fn cancel(&self, url: &str);
}

/// Validates a downloaded file before it's allowed to replace the current
/// one in place.
#[async_trait]
pub trait DescriptorValidator: Send + Sync {
    async fn validate(&self, path: &Path) -> Result<()>;
}

/// Persisted `{lastUrl, lastHash}` kept beside each list file (spec §4.D
/// "State"). A trivial in-memory implementation is provided for tests; the
/// daemon backs this with the property storage collaborator.
#[async_trait]
pub trait DescriptorRecordStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
    async fn clear(&self, key: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Allow,
    Deny,
}

impl ListKind {
    fn label(self) -> &'static str {
        match self {
            ListKind::Allow => "whitelist",
            ListKind::Deny => "blacklist",
        }
    }

    fn url_key(self) -> String {
        format!("descriptor.{}.url", self.label())
    }

    fn hash_key(self) -> String {
        format!("descriptor.{}.hash", self.label())
    }
}

#[derive(Debug, Clone)]
pub enum DescriptorEvent {
    /// Fired exactly once per successful allow-list download pass.
    ReadyForDevices,
    /// Fired on any successful download, either list.
    DescriptorsUpdated,
}

fn content_hash(bytes: &[u8]) -> String {
    // FNV-1a: good enough to detect content drift without pulling in a
    // cryptographic hashing crate the core doesn't otherwise need.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

fn is_sentinel_or_too_short(url: &str) -> bool {
    url.len() < MIN_URL_LEN || url.eq_ignore_ascii_case(BLACKLIST_SENTINEL)
}

struct TaskState {
    epoch: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
    current_url: RwLock<Option<String>>,
}

impl TaskState {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            handle: Mutex::new(None),
            current_url: RwLock::new(None),
        }
    }
}

pub struct DescriptorHandler {
    fetcher: Arc<dyn UrlFetcher>,
    validator: Arc<dyn DescriptorValidator>,
    records: Arc<dyn DescriptorRecordStore>,
    allow_path: PathBuf,
    deny_path: PathBuf,
    allow_state: Arc<TaskState>,
    deny_state: Arc<TaskState>,
    events_tx: broadcast::Sender<DescriptorEvent>,
}

impl DescriptorHandler {
    pub fn new(
        fetcher: Arc<dyn UrlFetcher>,
        validator: Arc<dyn DescriptorValidator>,
        records: Arc<dyn DescriptorRecordStore>,
        allow_path: PathBuf,
        deny_path: PathBuf,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            fetcher,
            validator,
            records,
            allow_path,
            deny_path,
            allow_state: Arc::new(TaskState::new()),
            deny_state: Arc::new(TaskState::new()),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DescriptorEvent> {
        self.events_tx.subscribe()
    }

    fn path_for(&self, kind: ListKind) -> PathBuf {
        match kind {
            ListKind::Allow => self.allow_path.clone(),
            ListKind::Deny => self.deny_path.clone(),
        }
    }

    fn state_for(&self, kind: ListKind) -> Arc<TaskState> {
        match kind {
            ListKind::Allow => self.allow_state.clone(),
            ListKind::Deny => self.deny_state.clone(),
        }
    }

    /// `needsUpdate` (spec §4.D).
    pub async fn needs_update(&self, kind: ListKind, new_url: &str) -> bool {
        let last_url = self.records.get(&kind.url_key()).await;
        let last_hash = self.records.get(&kind.hash_key()).await;

        let (last_url, last_hash) = match (last_url, last_hash) {
            (Some(u), Some(h)) => (u, h),
            _ => return true,
        };

        let path = self.path_for(kind);
        if !path.exists() {
            return true;
        }

        if last_url != new_url {
            return true;
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => content_hash(&bytes) != last_hash,
            Err(_) => true,
        }
    }

    /// Assigns a new URL to the allow-list or deny-list task. Cancels any
    /// in-flight fetch (URL cancellation first, so the worker unblocks
    /// promptly, then the scheduled task) before re-arming (spec §5
    /// "Cancellation").
    pub async fn assign_url(self: &Arc<Self>, kind: ListKind, new_url: String) {
        let state = self.state_for(kind);
        let previous_url = state.current_url.read().await.clone();

        state.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(prev) = &previous_url {
            self.fetcher.cancel(prev);
        }
        if let Some(handle) = state.handle.lock().await.take() {
            handle.abort();
        }

        if is_sentinel_or_too_short(&new_url) {
            *state.current_url.write().await = None;
            let _ = tokio::fs::remove_file(self.path_for(kind)).await;
            self.records.clear(&kind.url_key()).await;
            self.records.clear(&kind.hash_key()).await;
            return;
        }

        *state.current_url.write().await = Some(new_url.clone());

        if !self.needs_update(kind, &new_url).await {
            return;
        }

        let this = self.clone();
        let epoch = state.epoch.load(Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            this.retry_loop(kind, new_url, epoch).await;
        });
        *state.handle.lock().await = Some(handle);
    }

    async fn retry_loop(self: Arc<Self>, kind: ListKind, url: String, epoch: u64) {
        let state = self.state_for(kind);
        let mut delay = INITIAL_DELAY;

        loop {
            if state.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }

            match self.download_once(kind, &url).await {
                Ok(()) => {
                    let _ = self.events_tx.send(DescriptorEvent::DescriptorsUpdated);
                    if kind == ListKind::Allow {
                        let _ = self.events_tx.send(DescriptorEvent::ReadyForDevices);
                    }
                    return;
                }
                Err(e) => {
                    log::warn!("descriptor download failed for {} ({}): {}", kind.label(), url, e);
                }
            }

            tokio::time::sleep(delay).await;
            delay = (delay + DELAY_INCREMENT).min(MAX_DELAY);
        }
    }

    /// Download procedure (spec §4.D): temp file, domain validation, atomic
    /// rename, record update. Any failure deletes the temp file.
    async fn download_once(&self, kind: ListKind, url: &str) -> Result<()> {
        let dest = self.path_for(kind);
        let tmp = dest.with_extension("tmp");

        let (status, size) = self
            .fetcher
            .download(url, &tmp, DOWNLOAD_TIMEOUT)
            .await
            .map_err(CoreError::from)?;

        if !(status == 200 || status == 0) || size == 0 {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CoreError::IoError(format!(
                "download of {url} failed with status {status}, size {size}"
            )));
        }

        if let Err(e) = self.validator.validate(&tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        let bytes = tokio::fs::read(&tmp).await?;
        let hash = content_hash(&bytes);

        tokio::fs::rename(&tmp, &dest).await?;

        self.records.set(&kind.url_key(), url.to_string()).await;
        self.records.set(&kind.hash_key(), hash).await;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MemRecords(StdMutex<HashMap<String, String>>);

    impl MemRecords {
        fn new() -> Arc<Self> {
            Arc::new(Self(StdMutex::new(HashMap::new())))
        }
    }

    #[async_trait]
    impl DescriptorRecordStore for MemRecords {
        async fn get(&self, key: &str) -> Option<String> {
            self.0.lock().unwrap().get(key).cloned()
        }
        async fn set(&self, key: &str, value: String) {
            self.0.lock().unwrap().insert(key.to_string(), value);
        }
        async fn clear(&self, key: &str) {
            self.0.lock().unwrap().remove(key);
        }
    }

    struct OkFetcher(&'static [u8]);

    #[async_trait]
    impl UrlFetcher for OkFetcher {
        async fn download(&self, _url: &str, path: &Path, _timeout: Duration) -> std::io::Result<(u16, u64)> {
            tokio::fs::write(path, self.0).await?;
            Ok((200, self.0.len() as u64))
        }
        fn cancel(&self, _url: &str) {}
    }

    struct NoopValidator;

    #[async_trait]
    impl DescriptorValidator for NoopValidator {
        async fn validate(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn tmp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("descriptor-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn needs_update_true_when_no_prior_record() {
        let dir = tmp_dir();
        let handler = DescriptorHandler::new(
            Arc::new(OkFetcher(b"abc")),
            Arc::new(NoopValidator),
            MemRecords::new(),
            dir.join("whitelist"),
            dir.join("blacklist"),
        );
        assert!(handler.needs_update(ListKind::Allow, "http://x/a.lst").await);
    }

    #[tokio::test]
    async fn download_updates_record_and_fires_ready() {
        let dir = tmp_dir();
        let handler = Arc::new(DescriptorHandler::new(
            Arc::new(OkFetcher(b"contents")),
            Arc::new(NoopValidator),
            MemRecords::new(),
            dir.join("whitelist2"),
            dir.join("blacklist2"),
        ));
        let mut events = handler.subscribe();

        handler
            .assign_url(ListKind::Allow, "http://example.com/a.lst".to_string())
            .await;

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        let labels: Vec<_> = [first, second]
            .into_iter()
            .map(|e| matches!(e, DescriptorEvent::ReadyForDevices))
            .collect();
        assert!(labels.contains(&true));

        assert!(!handler.needs_update(ListKind::Allow, "http://example.com/a.lst").await);
    }

    #[tokio::test]
    async fn blacklist_sentinel_clears_state() {
        let dir = tmp_dir();
        let records = MemRecords::new();
        records.set(&ListKind::Deny.url_key(), "http://old".to_string()).await;
        records.set(&ListKind::Deny.hash_key(), "deadbeef".to_string()).await;
        let deny_path = dir.join("blacklist3");
        tokio::fs::write(&deny_path, b"old contents").await.unwrap();

        let handler = Arc::new(DescriptorHandler::new(
            Arc::new(OkFetcher(b"unused")),
            Arc::new(NoopValidator),
            records.clone(),
            dir.join("whitelist3"),
            deny_path.clone(),
        ));

        handler
            .assign_url(ListKind::Deny, BLACKLIST_SENTINEL.to_string())
            .await;

        assert!(!deny_path.exists());
        assert!(records.get(&ListKind::Deny.url_key()).await.is_none());
        assert!(records.get(&ListKind::Deny.hash_key()).await.is_none());
    }

    #[test]
    fn short_url_is_sentinel() {
        assert!(is_sentinel_or_too_short("http://a"));
        assert!(is_sentinel_or_too_short("HTTP://TOBEREPLACED"));
        assert!(!is_sentinel_or_too_short("http://example.com/a.lst"));
    }
}
