//! The data model store (spec §4.B): owns the live device graph, persists
//! it, and emits change notifications.
//!
//! Grounded on `device_manager::DeviceManagerInner` (an `RwLock`-guarded
//! `Vec<Arc<Device>>` with an `mpsc`-based event stream): here the
//! equivalent is an `RwLock<HashMap<String, Device>>` plus a
//! `tokio::sync::broadcast` channel so multiple subscribers (the watchdog,
//! the HTTP surface) can each see every event exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::{CoreError, Result};

use super::{CachingPolicy, Device, DeviceDatabase, Endpoint, Metadata, Resource, ResourceMode, Uri};

/// What a driver's write hook reports back to the store (spec §4.B "Write
/// semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The driver didn't touch the resource itself; the store should
    /// persist `new_value` and, if the resource emits events and the value
    /// changed, fire `ResourceUpdated`.
    BaseDriverUpdates,
    /// The driver already applied the update (and is responsible for its
    /// own persistence/event side effects, if any).
    DriverUpdatedDirectly,
}

/// The store's view of "the managing driver for a resource": a thin seam so
/// `Store` never has to know about the driver registry's internals,
/// mirroring how `DeviceInner` only ever holds a `Weak` handle back to its
/// manager rather than owning it.
#[async_trait]
pub trait ResourceDriverDispatch: Send + Sync {
    async fn write_resource(
        &self,
        driver_name: &str,
        device: &Device,
        resource: &Resource,
        previous_value: &str,
        new_value: &str,
    ) -> Result<WriteOutcome>;

    async fn execute_resource(
        &self,
        driver_name: &str,
        device: &Device,
        resource: &Resource,
        argument: &str,
    ) -> Result<String>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct Store {
    devices: RwLock<HashMap<String, Device>>,
    events: broadcast::Sender<super::ModelEvent>,
    dispatch: Arc<dyn ResourceDriverDispatch>,
    db: Option<DeviceDatabase>,
}

impl Store {
    /// In-memory only, no backing database. Used by tests and by callers
    /// that manage persistence themselves.
    pub fn new(dispatch: Arc<dyn ResourceDriverDispatch>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            devices: RwLock::new(HashMap::new()),
            events,
            dispatch,
            db: None,
        }
    }

    /// Loads every device document under `db` and backs all further
    /// mutations with it (spec §4.F "On startup, for each stored device...").
    pub async fn open(dispatch: Arc<dyn ResourceDriverDispatch>, db: DeviceDatabase) -> Result<Self> {
        let loaded = db.load_all().await?;
        let (events, _) = broadcast::channel(1024);
        let devices = loaded.into_iter().map(|d| (d.uuid.clone(), d)).collect();
        Ok(Self {
            devices: RwLock::new(devices),
            events,
            dispatch,
            db: Some(db),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<super::ModelEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: super::ModelEvent) {
        // A lagging/absent subscriber must never block or fail insertion.
        let _ = self.events.send(event);
    }

    /// Writes `device`'s current document to the backing database. A no-op
    /// when the store was built with `new` rather than `open`.
    async fn persist_to_disk(&self, device: &Device) -> Result<()> {
        match &self.db {
            Some(db) => db.save(device).await,
            None => Ok(()),
        }
    }

    /// Inserts a fully-built device as the terminal step of onboarding
    /// (spec §4.F step 6). Fails with `Duplicate` if the uuid already
    /// exists.
    pub async fn persist_device(&self, device: Device) -> Result<()> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.uuid) {
            return Err(CoreError::Duplicate(device.uuid));
        }
        let uuid = device.uuid.clone();
        devices.insert(uuid.clone(), device.clone());
        drop(devices);
        self.persist_to_disk(&device).await?;
        self.emit(super::ModelEvent::DeviceAdded { uuid });
        Ok(())
    }

    pub async fn contains(&self, uuid: &str) -> bool {
        self.devices.read().await.contains_key(uuid)
    }

    pub async fn get_all(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn get_by_class(&self, device_class: &str) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.device_class == device_class)
            .cloned()
            .collect()
    }

    pub async fn get_by_subsystem(&self, subsystem: &str) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.subsystem == subsystem)
            .cloned()
            .collect()
    }

    pub async fn get_by_uri(&self, uri: &Uri) -> Result<Device> {
        let uuid = uuid_from_uri(uri)?;
        self.devices
            .read()
            .await
            .get(&uuid)
            .cloned()
            .ok_or_else(|| CoreError::not_found(uri.clone()))
    }

    pub async fn get_endpoint_by_uri(&self, uri: &Uri) -> Result<Endpoint> {
        let (uuid, endpoint_id) =
            uuid_and_endpoint_from_uri(uri).ok_or_else(|| CoreError::not_found(uri.clone()))?;
        let devices = self.devices.read().await;
        let device = devices
            .get(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        device
            .endpoint(&endpoint_id)
            .filter(|e| e.enabled)
            .cloned()
            .ok_or_else(|| CoreError::not_found(uri.clone()))
    }

    pub async fn get_resource_by_uri(&self, uri: &Uri) -> Result<Resource> {
        let uuid = uuid_from_uri(uri)?;
        let devices = self.devices.read().await;
        let device = devices
            .get(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        device
            .find_resource(uri)
            .cloned()
            .ok_or_else(|| CoreError::not_found(uri.clone()))
    }

    /// Resolves and returns a resource's current value. Does not consult
    /// the driver: callers needing a fresh read should trigger a
    /// `synchronizeDevice` through the driver registry first.
    pub async fn read_resource(&self, uri: &Uri) -> Result<String> {
        let resource = self.get_resource_by_uri(uri).await?;
        if !resource.is_readable() {
            return Err(CoreError::not_allowed(uri.clone(), "resource is not readable"));
        }
        Ok(resource.value)
    }

    /// `writeResource` (spec §4.B).
    pub async fn write_resource(&self, uri: &Uri, new_value: &str) -> Result<()> {
        let uuid = uuid_from_uri(uri)?;

        let (driver_name, device_snapshot, resource_snapshot) = {
            let devices = self.devices.read().await;
            let device = devices
                .get(&uuid)
                .ok_or_else(|| CoreError::not_found(uri.clone()))?;
            let resource = device
                .find_resource(uri)
                .ok_or_else(|| CoreError::not_found(uri.clone()))?;
            if !resource.is_writeable() {
                return Err(CoreError::not_allowed(uri.clone(), "resource is not writeable"));
            }
            (
                device.managing_driver_name.clone(),
                device.clone(),
                resource.clone(),
            )
        };

        let previous_value = resource_snapshot.value.clone();
        let outcome = self
            .dispatch
            .write_resource(&driver_name, &device_snapshot, &resource_snapshot, &previous_value, new_value)
            .await
            .map_err(|e| CoreError::DriverError(e.to_string()))?;

        if outcome == WriteOutcome::BaseDriverUpdates {
            let changed = previous_value != new_value;
            let emits_events = resource_snapshot.emits_events();

            let mut devices = self.devices.write().await;
            let device = devices
                .get_mut(&uuid)
                .ok_or_else(|| CoreError::not_found(uri.clone()))?;
            let resource = device
                .find_resource_mut(uri)
                .ok_or_else(|| CoreError::not_found(uri.clone()))?;
            resource.value = new_value.to_string();
            resource.date_of_last_sync_millis = now_millis();
            let snapshot = device.clone();
            drop(devices);
            self.persist_to_disk(&snapshot).await?;

            if emits_events && changed {
                self.emit(super::ModelEvent::ResourceUpdated {
                    uri: uri.clone(),
                    old_value: previous_value,
                    new_value: new_value.to_string(),
                    metadata_json: serde_json::Value::Null,
                });
            }
        }

        Ok(())
    }

    /// `executeResource` (spec §4.B). Delegates to the driver's execute
    /// hook; the response is returned verbatim and has no persistence
    /// side effect unless the driver separately calls `update_resource`.
    pub async fn execute_resource(&self, uri: &Uri, argument: &str) -> Result<String> {
        let uuid = uuid_from_uri(uri)?;
        let devices = self.devices.read().await;
        let device = devices
            .get(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        let resource = device
            .find_resource(uri)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        let driver_name = device.managing_driver_name.clone();
        let device = device.clone();
        let resource = resource.clone();
        drop(devices);

        self.dispatch
            .execute_resource(&driver_name, &device, &resource, argument)
            .await
            .map_err(|e| CoreError::DriverError(e.to_string()))
    }

    /// Driver-originated direct update, used when the driver reports
    /// `DriverUpdatedDirectly` but still wants the store synchronized (e.g.
    /// an asynchronous telemetry update from a subsystem façade).
    pub async fn update_resource(&self, uri: &Uri, new_value: &str) -> Result<()> {
        let uuid = uuid_from_uri(uri)?;
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        let resource = device
            .find_resource_mut(uri)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;

        let old_value = resource.value.clone();
        let emits_events = resource.emits_events();
        resource.value = new_value.to_string();
        resource.date_of_last_sync_millis = now_millis();
        let snapshot = device.clone();
        drop(devices);
        self.persist_to_disk(&snapshot).await?;

        if emits_events && old_value != new_value {
            self.emit(super::ModelEvent::ResourceUpdated {
                uri: uri.clone(),
                old_value,
                new_value: new_value.to_string(),
                metadata_json: serde_json::Value::Null,
            });
        }
        Ok(())
    }

    pub async fn change_resource_mode(&self, uri: &Uri, mode: ResourceMode) -> Result<()> {
        let uuid = uuid_from_uri(uri)?;
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        let resource = device
            .find_resource_mut(uri)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;
        resource.mode = mode;
        let snapshot = device.clone();
        drop(devices);
        self.persist_to_disk(&snapshot).await
    }

    /// Removes a device and everything it owns (spec §3 "destroyed on
    /// explicit removal"). Cascades to endpoints/resources/metadata and
    /// emits `DeviceRemoved`.
    pub async fn remove_device(&self, uuid: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        devices
            .remove(uuid)
            .ok_or_else(|| CoreError::not_found(Uri::device(uuid)))?;
        drop(devices);
        if let Some(db) = &self.db {
            db.remove(uuid).await?;
        }
        self.emit(super::ModelEvent::DeviceRemoved {
            uuid: uuid.to_string(),
        });
        Ok(())
    }

    /// Removes an endpoint, preserving the device (spec §4.B "Deletion
    /// semantics").
    pub async fn remove_endpoint_by_id(&self, device_uuid: &str, endpoint_id: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_uuid)
            .ok_or_else(|| CoreError::not_found(Uri::device(device_uuid)))?;
        let before = device.endpoints.len();
        device.endpoints.retain(|e| e.id != endpoint_id);
        if device.endpoints.len() == before {
            return Err(CoreError::not_found(Uri::endpoint(device_uuid, endpoint_id)));
        }
        let snapshot = device.clone();
        drop(devices);
        self.persist_to_disk(&snapshot).await
    }

    pub async fn set_metadata(&self, uri: &Uri, name: &str, value: &str) -> Result<()> {
        let (uuid, endpoint_id) = match uuid_and_endpoint_from_uri(uri) {
            Some((uuid, endpoint_id)) => (uuid, Some(endpoint_id)),
            None => (uuid_from_uri(uri)?, None),
        };

        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;

        match endpoint_id {
            Some(ep) => {
                let endpoint = device
                    .endpoint_mut(&ep)
                    .ok_or_else(|| CoreError::not_found(uri.clone()))?;
                endpoint.metadata.set(name, value);
            }
            None => device.metadata.set(name, value),
        }
        let snapshot = device.clone();
        drop(devices);
        self.persist_to_disk(&snapshot).await
    }

    pub async fn get_metadata(&self, uri: &Uri, name: &str) -> Result<String> {
        let (uuid, endpoint_id) = match uuid_and_endpoint_from_uri(uri) {
            Some((uuid, endpoint_id)) => (uuid, Some(endpoint_id)),
            None => (uuid_from_uri(uri)?, None),
        };

        let devices = self.devices.read().await;
        let device = devices
            .get(&uuid)
            .ok_or_else(|| CoreError::not_found(uri.clone()))?;

        let metadata: &Metadata = match &endpoint_id {
            Some(ep) => {
                &device
                    .endpoint(ep)
                    .ok_or_else(|| CoreError::not_found(uri.clone()))?
                    .metadata
            }
            None => &device.metadata,
        };

        metadata
            .get(name)
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::not_found(uri.clone()))
    }

    /// Crude glob-style match (`*` anywhere) against every metadata uri,
    /// sufficient for the RPC surface's "query by pattern" calls.
    pub async fn query_metadata_by_uri_pattern(&self, pattern: &str) -> Vec<(Uri, String, String)> {
        let devices = self.devices.read().await;
        let mut out = Vec::new();
        for device in devices.values() {
            for (name, value) in device.metadata.iter() {
                let uri = Uri::device_metadata(&device.uuid, name);
                if glob_match(pattern, uri.as_str()) {
                    out.push((uri, name.to_string(), value.to_string()));
                }
            }
            for ep in &device.endpoints {
                for (name, value) in ep.metadata.iter() {
                    let uri = Uri::endpoint_metadata(&device.uuid, &ep.id, name);
                    if glob_match(pattern, uri.as_str()) {
                        out.push((uri, name.to_string(), value.to_string()));
                    }
                }
            }
        }
        out
    }

    pub async fn query_resources_by_uri_pattern(&self, pattern: &str) -> Vec<Resource> {
        let devices = self.devices.read().await;
        let mut out = Vec::new();
        for device in devices.values() {
            for r in &device.resources {
                if glob_match(pattern, r.uri().as_str()) {
                    out.push(r.clone());
                }
            }
            for ep in &device.endpoints {
                for r in &ep.resources {
                    if glob_match(pattern, r.uri().as_str()) {
                        out.push(r.clone());
                    }
                }
            }
        }
        out
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, suffix)) => candidate.starts_with(prefix) && candidate.ends_with(suffix),
    }
}

fn uuid_from_uri(uri: &Uri) -> Result<String> {
    uri.as_str()
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::InvalidArg(format!("malformed uri: {uri}")))
}

fn uuid_and_endpoint_from_uri(uri: &Uri) -> Option<(String, String)> {
    let mut segments = uri.as_str().trim_start_matches('/').split('/');
    let uuid = segments.next()?.to_string();
    if segments.next()? != "ep" {
        return None;
    }
    let endpoint_id = segments.next()?.to_string();
    Some((uuid, endpoint_id))
}

pub fn mandatory_device_resources(owner_uuid: &str) -> Vec<Resource> {
    use super::resource::ResourceOwner;
    let owner = ResourceOwner::Device {
        uuid: owner_uuid.to_string(),
    };
    vec![
        Resource::new(
            "manufacturer",
            "string",
            "",
            ResourceMode::READABLE,
            CachingPolicy::Always,
            owner.clone(),
        ),
        Resource::new(
            "model",
            "string",
            "",
            ResourceMode::READABLE,
            CachingPolicy::Always,
            owner.clone(),
        ),
        Resource::new(
            "hwVersion",
            "string",
            "",
            ResourceMode::READABLE,
            CachingPolicy::Always,
            owner.clone(),
        ),
        Resource::new(
            "fwVersion",
            "string",
            "",
            ResourceMode::READABLE,
            CachingPolicy::Always,
            owner.clone(),
        ),
        Resource::new(
            "commFail",
            "boolean",
            "false",
            ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
            CachingPolicy::Always,
            owner.clone(),
        ),
        Resource::new(
            "lastInteraction",
            "dateTime",
            "0",
            ResourceMode::READABLE,
            CachingPolicy::Never,
            owner,
        ),
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::ResourceOwner;

    struct NoopDispatch;

    #[async_trait]
    impl ResourceDriverDispatch for NoopDispatch {
        async fn write_resource(
            &self,
            _driver_name: &str,
            _device: &Device,
            _resource: &Resource,
            _previous_value: &str,
            _new_value: &str,
        ) -> Result<WriteOutcome> {
            Ok(WriteOutcome::BaseDriverUpdates)
        }

        async fn execute_resource(
            &self,
            _driver_name: &str,
            _device: &Device,
            _resource: &Resource,
            _argument: &str,
        ) -> Result<String> {
            Ok("ok".to_string())
        }
    }

    fn sample_device() -> Device {
        let mut device = Device::new("u1", "sensor", 1, "mock-driver", "zigbee");
        device.resources.push(Resource::new(
            "battery",
            "percentage",
            "100",
            ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
            CachingPolicy::Always,
            ResourceOwner::Device {
                uuid: "u1".to_string(),
            },
        ));
        device.resources.push(Resource::new(
            "locked",
            "boolean",
            "false",
            ResourceMode::READABLE | ResourceMode::WRITEABLE | ResourceMode::EMIT_EVENTS,
            CachingPolicy::Always,
            ResourceOwner::Device {
                uuid: "u1".to_string(),
            },
        ));
        device
    }

    #[tokio::test]
    async fn write_to_non_writeable_resource_fails() {
        let store = Store::new(Arc::new(NoopDispatch));
        store.persist_device(sample_device()).await.unwrap();
        let uri = Uri::device_resource("u1", "battery");
        let err = store.write_resource(&uri, "50").await.unwrap_err();
        assert_eq!(err, CoreError::not_allowed(uri, "resource is not writeable"));
    }

    #[tokio::test]
    async fn write_success_persists_and_emits_once() {
        let store = Store::new(Arc::new(NoopDispatch));
        store.persist_device(sample_device()).await.unwrap();
        let mut events = store.subscribe();

        let uri = Uri::device_resource("u1", "locked");
        store.write_resource(&uri, "true").await.unwrap();

        let value = store.read_resource(&uri).await.unwrap();
        assert_eq!(value, "true");

        let evt = events.recv().await.unwrap();
        matches!(evt, super::super::ModelEvent::ResourceUpdated { .. });
    }

    #[tokio::test]
    async fn duplicate_persist_rejected() {
        let store = Store::new(Arc::new(NoopDispatch));
        store.persist_device(sample_device()).await.unwrap();
        let err = store.persist_device(sample_device()).await.unwrap_err();
        assert_eq!(err, CoreError::Duplicate("u1".to_string()));
    }

    #[tokio::test]
    async fn remove_device_cascades() {
        let store = Store::new(Arc::new(NoopDispatch));
        store.persist_device(sample_device()).await.unwrap();
        store.remove_device("u1").await.unwrap();
        assert!(store.get_by_uri(&Uri::device("u1")).await.is_err());
    }

    #[tokio::test]
    async fn open_reloads_devices_written_by_a_prior_store() {
        let dir = std::env::temp_dir().join(format!("gateway-store-test-{}", std::process::id()));
        let db = DeviceDatabase::new(&dir);

        let store = Store::open(Arc::new(NoopDispatch), db).await.unwrap();
        store.persist_device(sample_device()).await.unwrap();
        store
            .write_resource(&Uri::device_resource("u1", "locked"), "true")
            .await
            .unwrap();
        drop(store);

        let db = DeviceDatabase::new(&dir);
        let reopened = Store::open(Arc::new(NoopDispatch), db).await.unwrap();
        let device = reopened.get_by_uri(&Uri::device("u1")).await.unwrap();
        assert_eq!(
            device.find_resource(&Uri::device_resource("u1", "locked")).unwrap().value,
            "true"
        );
    }

    #[tokio::test]
    async fn disabled_endpoint_hidden_from_queries() {
        let store = Store::new(Arc::new(NoopDispatch));
        let mut device = sample_device();
        let mut ep = Endpoint::new("u1", "1", "sensor");
        ep.enabled = false;
        device.endpoints.push(ep);
        store.persist_device(device).await.unwrap();

        let err = store
            .get_endpoint_by_uri(&Uri::endpoint("u1", "1"))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::not_found(Uri::endpoint("u1", "1")));
    }
}
