//! The devices database (spec §4.B, §6): one JSON document per device under
//! a directory, written atomically via tmp->rename so a crash mid-write
//! never leaves a half-written document behind.
//!
//! Grounded on `daemon::properties::PropertyStore`'s tmp->rename discipline
//! (same idiom, one file per key instead of one file total) rather than a
//! single combined document, matching spec.md's "documents on local
//! filesystem" phrasing over "a single database file".

use std::path::PathBuf;

use tokio::fs;

use crate::error::{CoreError, Result};

use super::Device;

/// A directory of `<uuid>.json` device documents.
pub struct DeviceDatabase {
    dir: PathBuf,
}

impl DeviceDatabase {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loads every device document in the directory (spec §4.F "On startup,
    /// for each stored device..."). A missing directory loads as empty
    /// rather than erroring, matching `PropertyStore::load`'s treatment of a
    /// missing property file.
    pub async fn load_all(&self) -> Result<Vec<Device>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut devices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path).await?;
            let device: Device = serde_json::from_str(&contents).map_err(|e| {
                CoreError::IoError(format!("parsing device document {}: {e}", path.display()))
            })?;
            devices.push(device);
        }
        Ok(devices)
    }

    /// Writes `device`'s document, creating the directory on first use.
    pub async fn save(&self, device: &Device) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(device).map_err(|e| {
            CoreError::IoError(format!("serializing device {}: {e}", device.uuid))
        })?;

        let final_path = self.path_for(&device.uuid);
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes()).await?;
        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Deletes a device's document. Missing documents are not an error: a
    /// device removed before ever being persisted has nothing to clean up.
    pub async fn remove(&self, uuid: &str) -> Result<()> {
        match fs::remove_file(self.path_for(uuid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, uuid: &str) -> PathBuf {
        self.dir.join(format!("{uuid}.json"))
    }
}
