//! ZigBee-style subsystem façade (spec §4.H).
//!
//! Translates radio-level events (IAS zone status words, join/leave
//! notifications) into store updates and watchdog pets, and keeps a
//! bounded per-device telemetry ring for diagnostics. The radio itself
//! (firmware, wire framing, per-cluster command encoding) is explicitly
//! out of scope (spec §1) and is modeled here only as the
//! [`RadioSubsystem`] collaborator trait.
//!
//! Grounded on `device_manager::Device::task`: a small per-device state
//! machine reacting to an event stream, feeding results back into a shared
//! store behind a lock it never holds while awaiting I/O.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::driver::DeviceFoundDetails;
use crate::error::Result;
use crate::model::{Store, Uri};
use crate::watchdog::Watchdog;

bitflags! {
    /// IAS Zone status bits, as they arrive on the wire (subset relevant to
    /// spec §8 scenario 4).
    #[derive(Default)]
    pub struct IasZoneStatus: u16 {
        const ALARM1  = 0b0000_0000_0000_0001;
        const ALARM2  = 0b0000_0000_0000_0010;
        const TAMPER  = 0b0000_0000_0000_0100;
        const BATTERY = 0b0000_0000_0000_1000;
    }
}

/// Radio status payload, bit-exact naming per spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioStatus {
    pub is_available: bool,
    pub is_up: bool,
    pub is_open_for_join: bool,
    pub eui64: String,
    pub original_eui64: String,
    pub channel: u8,
    pub pan_id: u16,
    /// 32 lowercase hex chars, least-significant byte first.
    pub network_key: String,
}

/// The out-of-core radio subsystem collaborator (spec §1).
#[async_trait]
pub trait RadioSubsystem: Send + Sync {
    async fn status(&self) -> Result<RadioStatus>;
    async fn network_map(&self) -> Result<serde_json::Value>;
    async fn firmware_version(&self) -> Result<String>;
    async fn energy_scan(&self) -> Result<Vec<(u8, i16)>>;
    async fn enter_low_power_mode(&self) -> Result<()>;
    async fn exit_low_power_mode(&self) -> Result<()>;
}

/// Feeds newly-discovered devices into the lifecycle orchestrator (spec
/// "H feeds F (discovery)"), without the façade needing to depend on the
/// orchestrator directly.
#[async_trait]
pub trait DeviceDiscoverySink: Send + Sync {
    async fn device_found(&self, details: DeviceFoundDetails);
}

#[derive(Debug, Clone)]
enum TelemetryEntry {
    IasZoneStatus { endpoint_id: String, status: u16 },
    Joined,
    Left,
}

const DEFAULT_RING_CAPACITY: usize = 64;

pub struct ZigbeeSubsystem {
    store: std::sync::Arc<Store>,
    watchdog: std::sync::Arc<Watchdog>,
    discovery_sink: std::sync::Arc<dyn DeviceDiscoverySink>,
    telemetry: RwLock<HashMap<String, VecDeque<TelemetryEntry>>>,
    ring_capacity: usize,
}

impl ZigbeeSubsystem {
    pub fn new(
        store: std::sync::Arc<Store>,
        watchdog: std::sync::Arc<Watchdog>,
        discovery_sink: std::sync::Arc<dyn DeviceDiscoverySink>,
    ) -> Self {
        Self {
            store,
            watchdog,
            discovery_sink,
            telemetry: RwLock::new(HashMap::new()),
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }

    async fn record(&self, uuid: &str, entry: TelemetryEntry) {
        let mut telemetry = self.telemetry.write().await;
        let ring = telemetry.entry(uuid.to_string()).or_default();
        ring.push_back(entry);
        while ring.len() > self.ring_capacity {
            ring.pop_front();
        }
    }

    pub async fn telemetry_len(&self, uuid: &str) -> usize {
        self.telemetry.read().await.get(uuid).map(|r| r.len()).unwrap_or(0)
    }

    /// A device joined the network: pets the watchdog and forwards the
    /// details to the discovery sink so onboarding can proceed.
    pub async fn on_device_joined(&self, details: DeviceFoundDetails) {
        let uuid = details.uuid.clone();
        self.record(&uuid, TelemetryEntry::Joined).await;
        self.discovery_sink.device_found(details).await;
    }

    pub async fn on_device_left(&self, uuid: &str) {
        self.record(uuid, TelemetryEntry::Left).await;
    }

    /// IAS-zone-style status change (spec §8 scenario 4): updates
    /// `faulted` on `ALARM1`, `tampered` on `TAMPER`, in that order, and
    /// always advances `lastInteraction` first.
    pub async fn handle_ias_zone_status(
        &self,
        device_uuid: &str,
        endpoint_id: &str,
        status: IasZoneStatus,
    ) -> Result<()> {
        self.watchdog.pet(device_uuid).await;

        let last_interaction = Uri::device_resource(device_uuid, "lastInteraction");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        self.store.update_resource(&last_interaction, &now.to_string()).await?;

        if status.contains(IasZoneStatus::ALARM1) {
            let uri = Uri::endpoint_resource(device_uuid, endpoint_id, "faulted");
            self.store.update_resource(&uri, "true").await?;
        }

        if status.contains(IasZoneStatus::TAMPER) {
            let uri = Uri::endpoint_resource(device_uuid, endpoint_id, "tampered");
            self.store.update_resource(&uri, "true").await?;
        }

        self.record(
            device_uuid,
            TelemetryEntry::IasZoneStatus {
                endpoint_id: endpoint_id.to_string(),
                status: status.bits(),
            },
        )
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::store::ResourceDriverDispatch;
    use crate::model::{CachingPolicy, Device, Endpoint, Resource, ResourceMode, ResourceOwner};
    use async_trait::async_trait;
    use std::sync::Arc;

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

    struct NoopCallbacks;
    #[async_trait]
    impl crate::watchdog::WatchdogCallbacks for NoopCallbacks {
        async fn on_failed(&self, _uuid: &str) {}
        async fn on_restored(&self, _uuid: &str) {}
    }

    struct NoopSink;
    #[async_trait]
    impl DeviceDiscoverySink for NoopSink {
        async fn device_found(&self, _details: DeviceFoundDetails) {}
    }

    async fn sample_store() -> Arc<Store> {
        let store = Arc::new(Store::new(Arc::new(NoopDispatch)));
        let mut device = Device::new("u1", "sensor", 1, "zigbee-sensor", "zigbee");
        let mut ep = Endpoint::new("u1", "1", "sensor");
        ep.resources.push(Resource::new(
            "faulted",
            "boolean",
            "false",
            ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
            CachingPolicy::Always,
            ResourceOwner::Endpoint {
                uuid: "u1".into(),
                endpoint_id: "1".into(),
            },
        ));
        ep.resources.push(Resource::new(
            "tampered",
            "boolean",
            "false",
            ResourceMode::READABLE | ResourceMode::EMIT_EVENTS,
            CachingPolicy::Always,
            ResourceOwner::Endpoint {
                uuid: "u1".into(),
                endpoint_id: "1".into(),
            },
        ));
        device.endpoints.push(ep);
        device.resources.push(Resource::new(
            "lastInteraction",
            "dateTime",
            "0",
            ResourceMode::READABLE,
            CachingPolicy::Never,
            ResourceOwner::Device { uuid: "u1".into() },
        ));
        store.persist_device(device).await.unwrap();
        store
    }

    #[tokio::test]
    async fn alarm1_sets_faulted_and_advances_last_interaction() {
        let store = sample_store().await;
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        watchdog.monitor("u1", 60, false).await;
        let facade = ZigbeeSubsystem::new(store.clone(), watchdog, Arc::new(NoopSink));

        facade
            .handle_ias_zone_status("u1", "1", IasZoneStatus::ALARM1)
            .await
            .unwrap();

        let faulted = store
            .read_resource(&Uri::endpoint_resource("u1", "1", "faulted"))
            .await
            .unwrap();
        assert_eq!(faulted, "true");

        let tampered = store
            .read_resource(&Uri::endpoint_resource("u1", "1", "tampered"))
            .await
            .unwrap();
        assert_eq!(tampered, "false");

        let last = store.read_resource(&Uri::device_resource("u1", "lastInteraction")).await.unwrap();
        assert_ne!(last, "0");
    }

    #[tokio::test]
    async fn tamper_bit_sets_tampered_too() {
        let store = sample_store().await;
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        let facade = ZigbeeSubsystem::new(store.clone(), watchdog, Arc::new(NoopSink));

        facade
            .handle_ias_zone_status("u1", "1", IasZoneStatus::ALARM1 | IasZoneStatus::TAMPER)
            .await
            .unwrap();

        let tampered = store
            .read_resource(&Uri::endpoint_resource("u1", "1", "tampered"))
            .await
            .unwrap();
        assert_eq!(tampered, "true");
    }

    #[tokio::test]
    async fn telemetry_ring_records_events() {
        let store = sample_store().await;
        let watchdog = Watchdog::new(Arc::new(NoopCallbacks));
        let facade = ZigbeeSubsystem::new(store, watchdog, Arc::new(NoopSink));

        facade
            .handle_ias_zone_status("u1", "1", IasZoneStatus::ALARM1)
            .await
            .unwrap();
        assert_eq!(facade.telemetry_len("u1").await, 1);
    }
}
