//! Concrete, in-process implementations of the core's out-of-scope
//! collaborators (spec §1): a URL fetcher over `hyper`, a domain validator,
//! a descriptor lookup backed by the downloaded allow-list, and a stub
//! radio subsystem sufficient to run the daemon standalone.
//!
//! Grounded on the teacher's `minidsp::transport::ws::discover` (a bare
//! `hyper::Client::new().get(uri)` fetch) for the networking shape, and on
//! `transport::open_url`'s role as a swappable boundary for everything
//! else.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::descriptor::{DescriptorValidator, DeviceDescriptor, UrlFetcher};
use gateway_core::driver::DeviceFoundDetails;
use gateway_core::error::{CoreError, Result};
use gateway_core::lifecycle::DescriptorLookup;
use gateway_core::model::Device;
use gateway_core::subsystem::zigbee::{RadioStatus, RadioSubsystem};
use tokio::sync::RwLock;

/// Downloads descriptor lists over plain HTTP using `hyper`'s default
/// client. No mTLS: the spec's "HTTP/mTLS transport" is explicitly an
/// external collaborator and this is the local/test-grade stand-in for it.
pub struct HyperUrlFetcher {
    client: hyper::Client<hyper::client::HttpConnector>,
}

impl HyperUrlFetcher {
    pub fn new() -> Self {
        Self {
            client: hyper::Client::new(),
        }
    }
}

impl Default for HyperUrlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlFetcher for HyperUrlFetcher {
    async fn download(&self, url: &str, path: &Path, timeout: Duration) -> std::io::Result<(u16, u64)> {
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")))?;

        let fetch = async {
            let mut response = self
                .client
                .get(uri)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            let status = response.status().as_u16();
            let bytes = hyper::body::to_bytes(response.body_mut())
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            tokio::fs::write(path, &bytes).await?;
            Ok::<(u16, u64), std::io::Error>((status, bytes.len() as u64))
        };

        tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "download timed out"))?
    }

    fn cancel(&self, _url: &str) {
        // hyper's per-request futures are dropped (and thus cancelled) by
        // aborting the task that awaits them; see
        // `DescriptorHandler::assign_url`, which aborts the retry task
        // before a new URL is assigned. Nothing further to signal here.
    }
}

/// Accepts any non-empty file. A production deployment would check the
/// descriptor's signature or schema here; this daemon only guarantees the
/// bytes are plausible UTF-8 so a later parse doesn't immediately fail.
pub struct BasicDescriptorValidator;

#[async_trait]
impl DescriptorValidator for BasicDescriptorValidator {
    async fn validate(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(CoreError::InvalidArg("downloaded descriptor file is empty".into()));
        }
        if std::str::from_utf8(&bytes).is_err() {
            return Err(CoreError::InvalidArg("downloaded descriptor file is not valid utf-8".into()));
        }
        Ok(())
    }
}

/// Resolves descriptors from an in-memory table parsed out of the
/// downloaded allow-list (one `deviceClass:model` pair per line, as
/// `deviceClass,model`). The daemon repopulates this table whenever the
/// descriptor handler fires `DescriptorsUpdated`.
pub struct AllowListDescriptors {
    entries: RwLock<HashMap<(String, String), DeviceDescriptor>>,
}

impl AllowListDescriptors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub async fn reload(&self, allow_list_path: &Path) {
        let contents = match tokio::fs::read_to_string(allow_list_path).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("could not reload allow-list from {allow_list_path:?}: {e}");
                return;
            }
        };

        let mut entries = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((class, model)) = line.split_once(',') {
                let descriptor = DeviceDescriptor {
                    device_class: class.trim().to_string(),
                    model: model.trim().to_string(),
                    config: serde_json::Value::Null,
                };
                entries.insert((descriptor.device_class.clone(), descriptor.model.clone()), descriptor);
            }
        }

        log::info!("reloaded {} descriptor entries", entries.len());
        *self.entries.write().await = entries;
    }
}

#[async_trait]
impl DescriptorLookup for AllowListDescriptors {
    async fn current_descriptor(&self, details: &DeviceFoundDetails) -> Option<DeviceDescriptor> {
        self.entries
            .read()
            .await
            .get(&(details.class.clone(), details.model.clone()))
            .cloned()
    }

    async fn descriptor_for_device(&self, device: &Device) -> Option<DeviceDescriptor> {
        let model = device.resource("model").map(|r| r.value.clone()).unwrap_or_default();
        self.entries.read().await.get(&(device.device_class.clone(), model)).cloned()
    }
}

/// Stand-in radio subsystem: reports a fixed, always-up status and empty
/// scan results. The real ZigBee coordinator firmware is explicitly out of
/// scope (spec §1).
pub struct StubRadioSubsystem {
    eui64: String,
}

impl StubRadioSubsystem {
    pub fn new(eui64: impl Into<String>) -> Self {
        Self { eui64: eui64.into() }
    }
}

#[async_trait]
impl RadioSubsystem for StubRadioSubsystem {
    async fn status(&self) -> Result<RadioStatus> {
        Ok(RadioStatus {
            is_available: true,
            is_up: true,
            is_open_for_join: false,
            eui64: self.eui64.clone(),
            original_eui64: self.eui64.clone(),
            channel: 15,
            pan_id: 0x1a62,
            network_key: "0".repeat(32),
        })
    }

    async fn network_map(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "nodes": [] }))
    }

    async fn firmware_version(&self) -> Result<String> {
        Ok("0.0.0-stub".to_string())
    }

    async fn energy_scan(&self) -> Result<Vec<(u8, i16)>> {
        Ok((11..=26).map(|ch| (ch, -95)).collect())
    }

    async fn enter_low_power_mode(&self) -> Result<()> {
        Ok(())
    }

    async fn exit_low_power_mode(&self) -> Result<()> {
        Ok(())
    }
}
