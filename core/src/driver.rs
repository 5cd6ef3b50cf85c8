//! Driver registry & dispatch (spec §4.E).
//!
//! A driver exposes a named, immutable vtable of optional hooks through the
//! [`Driver`] trait; unimplemented hooks fall back to their documented
//! default ("no-op success", except `claim_device` and `register_resources`
//! which default to rejection). The registry is a process-wide singleton
//! (spec §9 "Global mutables"), built once at startup and never mutated
//! concurrently with dispatch — the same discipline the teacher applies to
//! `transport::Hub`/`SharedService`: construct, wrap in `Arc`, then share.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::DeviceDescriptor;
use crate::error::{CoreError, Result};
use crate::initial_values::InitialResourceValues;
use crate::model::{Device, Resource, Uri};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    MainsPower,
    BatteryLow,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyChangeEvent {
    pub key: String,
    pub value: String,
}

/// What a driver reports about a discovered device, before it becomes part
/// of the graph (spec §4.F).
#[derive(Debug, Clone)]
pub struct DeviceFoundDetails {
    pub uuid: String,
    pub class: String,
    pub class_version: u32,
    pub manufacturer: String,
    pub model: String,
    pub hw_version: String,
    pub fw_version: String,
    /// endpoint id -> profile name
    pub endpoint_profile_map: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub driver_name: String,
    pub subsystem: String,
}

/// Outcome of a driver-delegated resource write (re-exported here so driver
/// authors don't need to import `model::store` directly).
pub use crate::model::store::WriteOutcome;

/// The driver contract (spec §4.E). Every hook has a documented default so
/// a driver can implement only what it needs.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Non-empty set of device classes this driver may claim. Must be
    /// registered before discovery may begin (spec §3 invariant).
    fn supported_device_classes(&self) -> Vec<String>;

    /// If true, onboarding never rejects for lack of a matching descriptor
    /// (spec §4.F step 1).
    fn never_reject(&self) -> bool {
        false
    }

    /// `0` disables the communication watchdog for devices this driver
    /// manages.
    fn comm_fail_timeout_seconds(&self) -> u64 {
        0
    }

    fn get_device_class_version(&self) -> u32 {
        1
    }

    // ---- Lifecycle --------------------------------------------------
    async fn startup(&self) -> bool {
        true
    }
    async fn shutdown(&self) {}
    async fn subsystem_initialized(&self) {}
    async fn system_power_event(&self, _state: PowerState) {}
    async fn property_changed(&self, _event: PropertyChangeEvent) {}

    // ---- Discovery ----------------------------------------------------
    async fn discover_devices(&self, _class: &str) {}
    async fn recover_devices(&self, _class: &str) {}
    async fn stop_discovering(&self, _class: Option<&str>) {}

    // ---- Onboarding (strict order per device) --------------------------
    async fn claim_device(&self, _details: &DeviceFoundDetails) -> bool {
        false
    }

    async fn configure_device(&self, _device: &mut Device, _descriptor: &DeviceDescriptor) -> bool {
        true
    }

    async fn fetch_initial_resource_values(
        &self,
        _device: &Device,
        _details: &DeviceFoundDetails,
        _bag: &mut InitialResourceValues,
    ) -> bool {
        true
    }

    /// Mandatory: defaults to `false` (rejection) because a device with no
    /// resources is meaningless.
    async fn register_resources(
        &self,
        _device: &mut Device,
        _details: &DeviceFoundDetails,
        _bag: &InitialResourceValues,
    ) -> bool {
        false
    }

    async fn device_persisted(&self, _device: &Device) -> bool {
        true
    }

    // ---- Runtime --------------------------------------------------------
    async fn read_resource(&self, _device: &Device, _resource: &Resource) -> Result<String> {
        Ok(_resource.value.clone())
    }

    async fn write_endpoint_resource(
        &self,
        _device: &Device,
        _resource: &Resource,
        _previous_value: &str,
        _new_value: &str,
    ) -> Result<WriteOutcome> {
        Ok(WriteOutcome::BaseDriverUpdates)
    }

    async fn execute_resource(
        &self,
        _device: &Device,
        _resource: &Resource,
        _argument: &str,
    ) -> Result<String> {
        Ok(String::new())
    }

    async fn synchronize_device(&self, _device: &Device) -> bool {
        true
    }

    async fn device_needs_reconfiguring(&self, _device: &Device) -> bool {
        false
    }

    async fn process_device_descriptor(&self, _device: &Device, _descriptor: &DeviceDescriptor) -> bool {
        true
    }

    async fn communication_failed(&self, _uuid: &str) {}
    async fn communication_restored(&self, _uuid: &str) {}
    async fn device_removed(&self, _uuid: &str) {}
    async fn endpoint_disabled(&self, _uri: &Uri) {}

    async fn fetch_runtime_stats(&self) -> Value {
        Value::Null
    }

    // ---- Integrity ------------------------------------------------------
    async fn restore_config(&self, _device: &Device, _blob: &[u8]) -> bool {
        true
    }
    async fn pre_restore_config(&self) {}
    async fn post_restore_config(&self) {}

    /// Maps a protocol-level device identifier to a device class, used
    /// alongside class-based registration to resolve a device's class
    /// during onboarding (spec §4.E "Dispatch rules").
    fn map_device_id_to_profile(&self, _protocol_id: &str) -> Option<String> {
        None
    }
}

/// Dictionary of drivers keyed by name, with per-class indices for claim
/// dispatch (spec §4.E).
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
    /// Registration order, used to break ties among drivers whose
    /// `claim_device` both return true (spec §9 open question: source
    /// appears to use first-registered-wins).
    registration_order: Vec<String>,
    classes: HashMap<String, Vec<String>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
            registration_order: Vec::new(),
            classes: HashMap::new(),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) -> Result<()> {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            return Err(CoreError::Duplicate(format!("driver {name} already registered")));
        }
        let classes = driver.supported_device_classes();
        if classes.is_empty() {
            return Err(CoreError::InvalidArg(format!(
                "driver {name} declares no supported device classes"
            )));
        }
        for class in &classes {
            self.classes.entry(class.clone()).or_default().push(name.clone());
        }
        self.registration_order.push(name.clone());
        self.drivers.insert(name, driver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    pub fn drivers_for_class(&self, class: &str) -> Vec<Arc<dyn Driver>> {
        self.classes
            .get(class)
            .into_iter()
            .flatten()
            .filter_map(|name| self.drivers.get(name).cloned())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn Driver>> {
        self.registration_order
            .iter()
            .filter_map(|name| self.drivers.get(name).cloned())
            .collect()
    }

    /// First driver (in registration order) whose `claim_device` returns
    /// true for this class's candidate drivers.
    pub async fn dispatch_claim(&self, details: &DeviceFoundDetails) -> Option<Arc<dyn Driver>> {
        for driver in self.drivers_for_class(&details.class) {
            if driver.claim_device(details).await {
                return Some(driver);
            }
        }
        None
    }

    pub async fn shutdown_all(&self) {
        for driver in self.all() {
            driver.shutdown().await;
        }
    }
}

/// Dispatches store-originated resource writes/executes to the managing
/// driver. Implements [`crate::model::store::ResourceDriverDispatch`] so a
/// [`crate::model::Store`] can be built on top of the registry without
/// knowing about `Driver` directly (spec §9 "opaque driver context").
pub struct RegistryDispatch {
    registry: Arc<tokio::sync::RwLock<DriverRegistry>>,
}

impl RegistryDispatch {
    pub fn new(registry: Arc<tokio::sync::RwLock<DriverRegistry>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl crate::model::store::ResourceDriverDispatch for RegistryDispatch {
    async fn write_resource(
        &self,
        driver_name: &str,
        device: &Device,
        resource: &Resource,
        previous_value: &str,
        new_value: &str,
    ) -> Result<WriteOutcome> {
        let driver = {
            let registry = self.registry.read().await;
            registry
                .get(driver_name)
                .ok_or_else(|| CoreError::DriverError(format!("unknown driver {driver_name}")))?
        };
        driver
            .write_endpoint_resource(device, resource, previous_value, new_value)
            .await
    }

    async fn execute_resource(
        &self,
        driver_name: &str,
        device: &Device,
        resource: &Resource,
        argument: &str,
    ) -> Result<String> {
        let driver = {
            let registry = self.registry.read().await;
            registry
                .get(driver_name)
                .ok_or_else(|| CoreError::DriverError(format!("unknown driver {driver_name}")))?
        };
        driver.execute_resource(device, resource, argument).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct StubDriver {
        name: &'static str,
        classes: Vec<&'static str>,
        claims: bool,
    }

    #[async_trait]
    impl Driver for StubDriver {
        fn name(&self) -> &str {
            self.name
        }

        fn supported_device_classes(&self) -> Vec<String> {
            self.classes.iter().map(|s| s.to_string()).collect()
        }

        async fn claim_device(&self, _details: &DeviceFoundDetails) -> bool {
            self.claims
        }
    }

    fn details() -> DeviceFoundDetails {
        DeviceFoundDetails {
            uuid: "u1".into(),
            class: "sensor".into(),
            class_version: 1,
            manufacturer: "acme".into(),
            model: "m1".into(),
            hw_version: "1".into(),
            fw_version: "1".into(),
            endpoint_profile_map: HashMap::new(),
            metadata: HashMap::new(),
            driver_name: "".into(),
            subsystem: "zigbee".into(),
        }
    }

    #[tokio::test]
    async fn first_registered_claimant_wins() {
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(StubDriver {
                name: "a",
                classes: vec!["sensor"],
                claims: true,
            }))
            .unwrap();
        registry
            .register(Arc::new(StubDriver {
                name: "b",
                classes: vec!["sensor"],
                claims: true,
            }))
            .unwrap();

        let claimed = registry.dispatch_claim(&details()).await.unwrap();
        assert_eq!(claimed.name(), "a");
    }

    #[tokio::test]
    async fn no_claimant_returns_none() {
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(StubDriver {
                name: "a",
                classes: vec!["sensor"],
                claims: false,
            }))
            .unwrap();
        assert!(registry.dispatch_claim(&details()).await.is_none());
    }

    #[test]
    fn empty_class_set_rejected() {
        let mut registry = DriverRegistry::new();
        let err = registry
            .register(Arc::new(StubDriver {
                name: "a",
                classes: vec![],
                claims: true,
            }))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArg(_)));
    }

    #[test]
    fn duplicate_driver_name_rejected() {
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(StubDriver {
                name: "a",
                classes: vec!["sensor"],
                claims: true,
            }))
            .unwrap();
        let err = registry
            .register(Arc::new(StubDriver {
                name: "a",
                classes: vec!["thermostat"],
                claims: true,
            }))
            .unwrap_err();
        assert!(matches!(err, CoreError::Duplicate(_)));
    }
}
