//! A worked-example driver for ZigBee-style IAS-zone sensors (spec §8
//! scenario 4), the one driver this daemon registers out of the box so
//! discovery has somewhere to land devices the [`crate::collaborators`]
//! radio stub reports.
//!
//! Grounded on `lifecycle::test::AcceptingDriver`, generalized from a single
//! `faulted` resource to the full onboarding pipeline (endpoints from
//! `endpointProfileMap`, mandatory resource fill-in, per-endpoint seeds).

use async_trait::async_trait;
use gateway_core::descriptor::DeviceDescriptor;
use gateway_core::driver::{Driver, DeviceFoundDetails};
use gateway_core::initial_values::{create_endpoint_resource_if_available, InitialResourceValues, ValueKey};
use gateway_core::model::{CachingPolicy, Device, Endpoint, ResourceMode};

pub struct ZigbeeDriver;

impl ZigbeeDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ZigbeeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for ZigbeeDriver {
    fn name(&self) -> &str {
        "zigbee-sensor"
    }

    fn supported_device_classes(&self) -> Vec<String> {
        vec!["sensor".to_string()]
    }

    fn comm_fail_timeout_seconds(&self) -> u64 {
        60
    }

    async fn claim_device(&self, _details: &DeviceFoundDetails) -> bool {
        true
    }

    async fn configure_device(&self, _device: &mut Device, _descriptor: &DeviceDescriptor) -> bool {
        true
    }

    async fn fetch_initial_resource_values(
        &self,
        _device: &Device,
        details: &DeviceFoundDetails,
        bag: &mut InitialResourceValues,
    ) -> bool {
        for endpoint_id in details.endpoint_profile_map.keys() {
            bag.put(ValueKey::endpoint(endpoint_id.clone(), "faulted"), Some("false".to_string()));
            bag.put(ValueKey::endpoint(endpoint_id.clone(), "tampered"), Some("false".to_string()));
        }
        true
    }

    async fn register_resources(
        &self,
        device: &mut Device,
        details: &DeviceFoundDetails,
        bag: &InitialResourceValues,
    ) -> bool {
        for (id, value) in [
            ("manufacturer", &details.manufacturer),
            ("model", &details.model),
            ("hwVersion", &details.hw_version),
            ("fwVersion", &details.fw_version),
        ] {
            if let Some(resource) = device.resource_mut(id) {
                resource.value = value.clone();
            }
        }

        for (endpoint_id, profile) in &details.endpoint_profile_map {
            let mut endpoint = Endpoint::new(device.uuid.clone(), endpoint_id.clone(), profile.clone());
            create_endpoint_resource_if_available(
                &mut endpoint,
                bag,
                "faulted",
                "boolean",
                ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
                CachingPolicy::Always,
            );
            create_endpoint_resource_if_available(
                &mut endpoint,
                bag,
                "tampered",
                "boolean",
                ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
                CachingPolicy::Always,
            );
            device.endpoints.push(endpoint);
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn details() -> DeviceFoundDetails {
        let mut endpoint_profile_map = HashMap::new();
        endpoint_profile_map.insert("1".to_string(), "sensor".to_string());
        DeviceFoundDetails {
            uuid: "u1".into(),
            class: "sensor".into(),
            class_version: 1,
            manufacturer: "acme".into(),
            model: "door-sensor".into(),
            hw_version: "1".into(),
            fw_version: "1".into(),
            endpoint_profile_map,
            metadata: HashMap::new(),
            driver_name: "zigbee-sensor".into(),
            subsystem: "zigbee".into(),
        }
    }

    #[tokio::test]
    async fn register_resources_creates_endpoint_with_faulted_and_tampered() {
        let driver = ZigbeeDriver::new();
        let details = details();
        let mut device = Device::new("u1", "sensor", 1, "zigbee-sensor", "zigbee");
        device.resources.push(gateway_core::model::Resource::new(
            "manufacturer",
            "string",
            "",
            ResourceMode::READABLE,
            CachingPolicy::Always,
            gateway_core::model::ResourceOwner::Device { uuid: "u1".into() },
        ));

        let mut bag = InitialResourceValues::new();
        driver.fetch_initial_resource_values(&device, &details, &mut bag).await;
        driver.register_resources(&mut device, &details, &bag).await;

        let endpoint = device.endpoint("1").expect("endpoint 1 created");
        assert!(endpoint.resource("faulted").is_some());
        assert!(endpoint.resource("tampered").is_some());
        assert_eq!(device.resource("manufacturer").unwrap().value, "acme");
    }
}
