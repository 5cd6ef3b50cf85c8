//! Device lifecycle orchestrator (spec §4.F): runs the ordered
//! device-onboarding pipeline, persists on success, and keeps stored
//! devices in sync with descriptor updates.
//!
//! Grounded on `device_manager::Device::task_inner`, which performs the
//! same shape of strictly-ordered async pipeline (connect, probe, identify,
//! publish a handle) and only publishes the result once every step
//! succeeds.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::descriptor::DeviceDescriptor;
use crate::driver::{DeviceFoundDetails, Driver, DriverRegistry};
use crate::error::{CoreError, Result};
use crate::initial_values::InitialResourceValues;
use crate::model::store::mandatory_device_resources;
use crate::model::{Device, Store};
use crate::watchdog::Watchdog;

/// Resolves the currently-active descriptor for a device, given what the
/// driver reported during discovery (spec glossary "Descriptor"). Backed in
/// the daemon by the descriptor handler's allow-list cache.
#[async_trait]
pub trait DescriptorLookup: Send + Sync {
    async fn current_descriptor(&self, details: &DeviceFoundDetails) -> Option<DeviceDescriptor>;
    async fn descriptor_for_device(&self, device: &Device) -> Option<DeviceDescriptor>;
}

pub struct LifecycleOrchestrator {
    store: Arc<Store>,
    registry: Arc<RwLock<DriverRegistry>>,
    watchdog: Arc<Watchdog>,
    descriptors: Arc<dyn DescriptorLookup>,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<RwLock<DriverRegistry>>,
        watchdog: Arc<Watchdog>,
        descriptors: Arc<dyn DescriptorLookup>,
    ) -> Self {
        Self {
            store,
            registry,
            watchdog,
            descriptors,
        }
    }

    async fn driver_for(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.registry
            .read()
            .await
            .get(name)
            .ok_or_else(|| CoreError::DriverError(format!("unknown driver {name}")))
    }

    /// The onboarding pipeline (spec §4.F steps 1-7). Every abortable step
    /// returns before anything is persisted, so a failed onboarding leaves
    /// no trace in the store.
    pub async fn onboard_device(&self, details: DeviceFoundDetails) -> Result<()> {
        // 1. Admission.
        if self.store.contains(&details.uuid).await {
            return Err(CoreError::Duplicate(details.uuid));
        }

        let driver = self.driver_for(&details.driver_name).await?;

        let descriptor = self.descriptors.current_descriptor(&details).await;
        if descriptor.is_none() && !driver.never_reject() {
            return Err(CoreError::NoDescriptor);
        }

        // 2. Bootstrap graph.
        let mut shell = Device::new(
            details.uuid.clone(),
            details.class.clone(),
            details.class_version,
            driver.name(),
            details.subsystem.clone(),
        );
        shell.resources = mandatory_device_resources(&details.uuid);
        for (key, value) in &details.metadata {
            shell.metadata.set(key.clone(), value.clone());
        }

        // 3. Configure.
        let descriptor = descriptor.unwrap_or_else(|| DeviceDescriptor {
            device_class: details.class.clone(),
            model: details.model.clone(),
            config: serde_json::Value::Null,
        });
        if !driver.configure_device(&mut shell, &descriptor).await {
            return Err(CoreError::DriverError("configureDevice returned false".into()));
        }

        // 4. Fetch initial values.
        let mut bag = InitialResourceValues::new();
        if !driver
            .fetch_initial_resource_values(&shell, &details, &mut bag)
            .await
        {
            return Err(CoreError::DriverError(
                "fetchInitialResourceValues returned false".into(),
            ));
        }

        // 5. Register resources.
        if !driver.register_resources(&mut shell, &details, &bag).await {
            return Err(CoreError::DriverError("registerResources returned false".into()));
        }

        // 6. Persist. Terminal state.
        self.store.persist_device(shell.clone()).await?;
        log::info!("device {} persisted (driver {})", shell.uuid, driver.name());

        // 7. Notify.
        let _ = driver.device_persisted(&shell).await;
        let timeout = driver.comm_fail_timeout_seconds();
        if timeout > 0 {
            self.watchdog.monitor(shell.uuid.clone(), timeout, false).await;
        }

        Ok(())
    }

    /// Reconfigure path (spec §4.F "Reconfigure path"), run once at
    /// startup for every stored device.
    pub async fn reconfigure_all(&self) {
        for device in self.store.get_all().await {
            let driver = match self.driver_for(&device.managing_driver_name).await {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("skipping reconfigure for {}: {}", device.uuid, e);
                    continue;
                }
            };

            if !driver.device_needs_reconfiguring(&device).await {
                continue;
            }

            if !driver.synchronize_device(&device).await {
                log::warn!("synchronizeDevice failed for {}", device.uuid);
                continue;
            }

            if let Some(descriptor) = self.descriptors.descriptor_for_device(&device).await {
                if !driver.process_device_descriptor(&device, &descriptor).await {
                    log::warn!("processDeviceDescriptor failed for {}", device.uuid);
                }
            }
        }
    }

    /// Descriptor refresh (spec §4.F "Descriptor refresh"): run whenever
    /// the descriptor handler signals `descriptorsUpdated`. Failures are
    /// logged, never fatal.
    pub async fn on_descriptors_updated(&self) {
        for device in self.store.get_all().await {
            let driver = match self.driver_for(&device.managing_driver_name).await {
                Ok(d) => d,
                Err(_) => continue,
            };
            let descriptor = match self.descriptors.descriptor_for_device(&device).await {
                Some(d) => d,
                None => continue,
            };
            if !driver.process_device_descriptor(&device, &descriptor).await {
                log::warn!(
                    "processDeviceDescriptor rejected refreshed descriptor for {}",
                    device.uuid
                );
            }
        }
    }

    /// Removes a device: tells the driver, stops the watchdog, then
    /// cascades the removal in the store (spec §4.B "Deletion semantics").
    pub async fn remove_device(&self, uuid: &str) -> Result<()> {
        let device = self.store.get_by_uri(&crate::model::Uri::device(uuid)).await?;
        if let Ok(driver) = self.driver_for(&device.managing_driver_name).await {
            driver.device_removed(uuid).await;
        }
        self.watchdog.stop_monitoring(uuid).await;
        self.store.remove_device(uuid).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::PowerState;
    use crate::model::store::ResourceDriverDispatch;
    use crate::model::{Resource, ResourceMode};
    use std::collections::HashMap as StdHashMap;

    struct AcceptingDriver;

    #[async_trait]
    impl Driver for AcceptingDriver {
        fn name(&self) -> &str {
            "mock"
        }
        fn supported_device_classes(&self) -> Vec<String> {
            vec!["sensor".to_string()]
        }

        async fn fetch_initial_resource_values(
            &self,
            _device: &Device,
            _details: &DeviceFoundDetails,
            bag: &mut InitialResourceValues,
        ) -> bool {
            bag.put(
                crate::initial_values::ValueKey::device("faulted"),
                Some("false".to_string()),
            );
            true
        }

        async fn register_resources(
            &self,
            device: &mut Device,
            _details: &DeviceFoundDetails,
            bag: &InitialResourceValues,
        ) -> bool {
            crate::initial_values::create_device_resource_if_available(
                device,
                bag,
                "faulted",
                "boolean",
                ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
                crate::model::CachingPolicy::Always,
            );
            true
        }

        fn comm_fail_timeout_seconds(&self) -> u64 {
            60
        }
    }

    struct RejectingConfigDriver;

    #[async_trait]
    impl Driver for RejectingConfigDriver {
        fn name(&self) -> &str {
            "reject-config"
        }
        fn supported_device_classes(&self) -> Vec<String> {
            vec!["sensor".to_string()]
        }
        async fn configure_device(&self, _device: &mut Device, _descriptor: &DeviceDescriptor) -> bool {
            false
        }
        fn never_reject(&self) -> bool {
            true
        }
    }

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
        ) -> Result<crate::model::store::WriteOutcome> {
            Ok(crate::model::store::WriteOutcome::BaseDriverUpdates)
        }
        async fn execute_resource(
            &self,
            _driver_name: &str,
            _device: &Device,
            _resource: &Resource,
            _argument: &str,
        ) -> Result<String> {
            Ok(String::new())
        }
    }

    struct AlwaysDescriptor;

    #[async_trait]
    impl DescriptorLookup for AlwaysDescriptor {
        async fn current_descriptor(&self, details: &DeviceFoundDetails) -> Option<DeviceDescriptor> {
            Some(DeviceDescriptor {
                device_class: details.class.clone(),
                model: details.model.clone(),
                config: serde_json::Value::Null,
            })
        }
        async fn descriptor_for_device(&self, device: &Device) -> Option<DeviceDescriptor> {
            Some(DeviceDescriptor {
                device_class: device.device_class.clone(),
                model: "unknown".to_string(),
                config: serde_json::Value::Null,
            })
        }
    }

    struct NoDescriptor;

    #[async_trait]
    impl DescriptorLookup for NoDescriptor {
        async fn current_descriptor(&self, _details: &DeviceFoundDetails) -> Option<DeviceDescriptor> {
            None
        }
        async fn descriptor_for_device(&self, _device: &Device) -> Option<DeviceDescriptor> {
            None
        }
    }

    struct NoopCallbacks;
    #[async_trait]
    impl crate::watchdog::WatchdogCallbacks for NoopCallbacks {
        async fn on_failed(&self, _uuid: &str) {}
        async fn on_restored(&self, _uuid: &str) {}
    }

    fn details(uuid: &str, driver_name: &str) -> DeviceFoundDetails {
        DeviceFoundDetails {
            uuid: uuid.to_string(),
            class: "sensor".to_string(),
            class_version: 1,
            manufacturer: "acme".to_string(),
            model: "m1".to_string(),
            hw_version: "1".to_string(),
            fw_version: "1".to_string(),
            endpoint_profile_map: StdHashMap::new(),
            metadata: StdHashMap::new(),
            driver_name: driver_name.to_string(),
            subsystem: "zigbee".to_string(),
        }
    }

    #[tokio::test]
    async fn happy_path_persists_and_arms_watchdog() {
        let store = Arc::new(Store::new(Arc::new(NoopDispatch)));
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(AcceptingDriver)).unwrap();
        let registry = Arc::new(RwLock::new(registry));
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        let orchestrator =
            LifecycleOrchestrator::new(store.clone(), registry, watchdog.clone(), Arc::new(AlwaysDescriptor));

        orchestrator.onboard_device(details("u1", "mock")).await.unwrap();

        assert!(store.contains("u1").await);
        assert!(watchdog.is_monitored("u1").await);

        let device = store.get_by_uri(&crate::model::Uri::device("u1")).await.unwrap();
        assert!(device.resource("faulted").is_some());
    }

    #[tokio::test]
    async fn duplicate_uuid_rejected() {
        let store = Arc::new(Store::new(Arc::new(NoopDispatch)));
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(AcceptingDriver)).unwrap();
        let registry = Arc::new(RwLock::new(registry));
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        let orchestrator =
            LifecycleOrchestrator::new(store, registry, watchdog, Arc::new(AlwaysDescriptor));

        orchestrator.onboard_device(details("u1", "mock")).await.unwrap();
        let err = orchestrator.onboard_device(details("u1", "mock")).await.unwrap_err();
        assert_eq!(err, CoreError::Duplicate("u1".to_string()));
    }

    #[tokio::test]
    async fn missing_descriptor_rejected_unless_never_reject() {
        let store = Arc::new(Store::new(Arc::new(NoopDispatch)));
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(AcceptingDriver)).unwrap();
        let registry = Arc::new(RwLock::new(registry));
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        let orchestrator =
            LifecycleOrchestrator::new(store.clone(), registry, watchdog, Arc::new(NoDescriptor));

        let err = orchestrator.onboard_device(details("u2", "mock")).await.unwrap_err();
        assert_eq!(err, CoreError::NoDescriptor);
        assert!(!store.contains("u2").await);
    }

    #[tokio::test]
    async fn config_failure_aborts_without_persisting() {
        let store = Arc::new(Store::new(Arc::new(NoopDispatch)));
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(RejectingConfigDriver)).unwrap();
        let registry = Arc::new(RwLock::new(registry));
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        let orchestrator =
            LifecycleOrchestrator::new(store.clone(), registry, watchdog, Arc::new(NoDescriptor));

        let err = orchestrator
            .onboard_device(details("u3", "reject-config"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DriverError(_)));
        assert!(!store.contains("u3").await);
    }

    #[test]
    fn power_state_variants_exist() {
        let _ = PowerState::Shutdown;
    }
}
