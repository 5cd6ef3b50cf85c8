//! Property file (spec §6 "Persisted state layout"): an XML document of
//! `<property><key/><value/><src/></property>` entries, backing both the
//! general property-storage collaborator and the descriptor handler's
//! `{lastUrl, lastHash}` records (spec §4.D "State").
//!
//! Grounded on the teacher's `minidsp::formats::xml_config` (`strong_xml`
//! derive over a flat list of child elements) and its tmp→rename write
//! discipline implied throughout the config/readme.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use gateway_core::descriptor::DescriptorRecordStore;
use gateway_core::error::{CoreError, Result};
use std::collections::HashMap;
use strong_xml::{XmlRead, XmlWrite};
use tokio::sync::RwLock;

const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, XmlRead, XmlWrite, PartialEq, Eq)]
#[xml(tag = "property")]
struct PropertyXml {
    #[xml(flatten_text = "key")]
    key: String,
    #[xml(flatten_text = "value")]
    value: String,
    #[xml(flatten_text = "src")]
    src: String,
}

#[derive(Debug, Clone, XmlRead, XmlWrite, PartialEq, Eq)]
#[xml(tag = "properties")]
struct PropertiesXml {
    #[xml(attr = "schema-version")]
    schema_version: String,
    #[xml(child = "property")]
    properties: Vec<PropertyXml>,
}

/// The type catalog gating property writes (spec §9 "Property type
/// checking"). Keys absent from the catalog accept any string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Boolean,
    Integer,
    String,
}

fn type_catalog() -> HashMap<&'static str, PropertyType> {
    let mut m = HashMap::new();
    m.insert("fast-timer", PropertyType::Boolean);
    m
}

fn validate(key: &str, value: &str) -> Result<()> {
    match type_catalog().get(key) {
        Some(PropertyType::Boolean) => {
            if value != "true" && value != "false" {
                return Err(CoreError::ValueNotAllowed(format!(
                    "property {key} expects a boolean, got {value:?}"
                )));
            }
        }
        Some(PropertyType::Integer) => {
            if value.parse::<i64>().is_err() {
                return Err(CoreError::ValueNotAllowed(format!(
                    "property {key} expects an integer, got {value:?}"
                )));
            }
        }
        Some(PropertyType::String) | None => {}
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    src: String,
}

/// An on-disk property store: a flat key→value map with provenance,
/// persisted as XML via tmp→rename (spec §6).
pub struct PropertyStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Entry>>,
}

impl PropertyStore {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let parsed = PropertiesXml::from_str(&contents)
                    .map_err(|e| CoreError::IoError(format!("parsing property file: {e}")))?;
                parsed
                    .properties
                    .into_iter()
                    .map(|p| (p.key, Entry { value: p.value, src: p.src }))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(CoreError::from(e)),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, Entry>) -> Result<()> {
        let doc = PropertiesXml {
            schema_version: SCHEMA_VERSION.to_string(),
            properties: entries
                .iter()
                .map(|(key, e)| PropertyXml {
                    key: key.clone(),
                    value: e.value.clone(),
                    src: e.src.clone(),
                })
                .collect(),
        };
        let xml = doc
            .to_string()
            .map_err(|e| CoreError::IoError(format!("serializing property file: {e}")))?;

        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, xml.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).map(|e| e.value.clone())
    }

    /// Sets `key`, validating against the type catalog first (spec §9).
    pub async fn set(&self, key: &str, value: String, src: impl Into<String>) -> Result<()> {
        validate(key, &value)?;
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, src: src.into() });
        let snapshot = entries.clone();
        drop(entries);
        self.persist(&snapshot).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        let snapshot = entries.clone();
        drop(entries);
        self.persist(&snapshot).await
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

#[async_trait]
impl DescriptorRecordStore for PropertyStore {
    async fn get(&self, key: &str) -> Option<String> {
        PropertyStore::get(self, key).await
    }

    async fn set(&self, key: &str, value: String) {
        let _ = PropertyStore::set(self, key, value, "descriptor-handler").await;
    }

    async fn clear(&self, key: &str) {
        let _ = PropertyStore::remove(self, key).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tmp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("properties-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let path = tmp_dir().join("properties1.xml");
        let _ = std::fs::remove_file(&path);

        let store = PropertyStore::load(&path).await.unwrap();
        store.set("fast-timer", "true".to_string(), "test").await.unwrap();

        let reopened = PropertyStore::load(&path).await.unwrap();
        assert_eq!(reopened.get("fast-timer").await, Some("true".to_string()));
    }

    #[tokio::test]
    async fn typed_property_rejects_bad_value() {
        let path = tmp_dir().join("properties2.xml");
        let _ = std::fs::remove_file(&path);
        let store = PropertyStore::load(&path).await.unwrap();

        let err = store
            .set("fast-timer", "not-a-bool".to_string(), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValueNotAllowed(_)));
    }

    #[tokio::test]
    async fn untyped_key_accepts_any_string() {
        let path = tmp_dir().join("properties3.xml");
        let _ = std::fs::remove_file(&path);
        let store = PropertyStore::load(&path).await.unwrap();
        store.set("custom.label", "whatever".to_string(), "user").await.unwrap();
        assert_eq!(store.get("custom.label").await, Some("whatever".to_string()));
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let path = tmp_dir().join("does-not-exist.xml");
        let store = PropertyStore::load(&path).await.unwrap();
        assert_eq!(store.get("anything").await, None);
    }
}
