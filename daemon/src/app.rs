//! The daemon's process-wide singleton: every long-lived collaborator, built
//! once at startup and shared by the HTTP surface through a global handle.
//!
//! Grounded on `src/bin/minidspd/main.rs`'s `lazy_static! { static ref APP:
//! Arc<RwLock<App>> }` plus `App::new()`; swapped for `once_cell` (already
//! the daemon's dependency for this purpose) since construction here is
//! async and can't run inside a `lazy_static` initializer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::descriptor::{DescriptorEvent, DescriptorHandler, ListKind};
use gateway_core::driver::{Driver, DriverRegistry, RegistryDispatch};
use gateway_core::lifecycle::LifecycleOrchestrator;
use gateway_core::model::{DeviceDatabase, Store, Uri};
use gateway_core::subsystem::zigbee::{DeviceDiscoverySink, RadioSubsystem, ZigbeeSubsystem};
use gateway_core::watchdog::{Watchdog, WatchdogCallbacks};
use once_cell::sync::OnceCell;
use tokio::sync::RwLock;

use crate::collaborators::{AllowListDescriptors, BasicDescriptorValidator, HyperUrlFetcher, StubRadioSubsystem};
use crate::config::Config;
use crate::properties::PropertyStore;

pub static APP: OnceCell<Arc<RwLock<App>>> = OnceCell::new();

/// Bridges watchdog callbacks into the store (the `commFail` resource, spec
/// §4.B mandatory resources) and the owning driver's lifecycle hooks.
struct WatchdogBridge {
    store: Arc<Store>,
    registry: Arc<RwLock<DriverRegistry>>,
}

#[async_trait]
impl WatchdogCallbacks for WatchdogBridge {
    async fn on_failed(&self, uuid: &str) {
        let _ = self.store.update_resource(&Uri::device_resource(uuid, "commFail"), "true").await;
        if let Ok(device) = self.store.get_by_uri(&Uri::device(uuid)).await {
            let registry = self.registry.read().await;
            if let Some(driver) = registry.get(&device.managing_driver_name) {
                driver.communication_failed(uuid).await;
            }
        }
    }

    async fn on_restored(&self, uuid: &str) {
        let _ = self.store.update_resource(&Uri::device_resource(uuid, "commFail"), "false").await;
        if let Ok(device) = self.store.get_by_uri(&Uri::device(uuid)).await {
            let registry = self.registry.read().await;
            if let Some(driver) = registry.get(&device.managing_driver_name) {
                driver.communication_restored(uuid).await;
            }
        }
    }
}

/// Feeds devices discovered by a subsystem façade into onboarding.
struct OnboardingSink {
    lifecycle: Arc<LifecycleOrchestrator>,
}

#[async_trait]
impl DeviceDiscoverySink for OnboardingSink {
    async fn device_found(&self, details: gateway_core::driver::DeviceFoundDetails) {
        let uuid = details.uuid.clone();
        if let Err(e) = self.lifecycle.onboard_device(details).await {
            log::warn!("onboarding failed for {uuid}: {e}");
        }
    }
}

pub struct App {
    pub config: Config,
    pub store: Arc<Store>,
    pub registry: Arc<RwLock<DriverRegistry>>,
    pub watchdog: Arc<Watchdog>,
    pub descriptors: Arc<DescriptorHandler>,
    pub allow_list: Arc<AllowListDescriptors>,
    pub lifecycle: Arc<LifecycleOrchestrator>,
    pub zigbee: Arc<ZigbeeSubsystem>,
    pub radio: Arc<dyn RadioSubsystem>,
    pub properties: Arc<PropertyStore>,
    pub discovery_active: RwLock<HashSet<String>>,
    /// Flips true exactly once, on the first successful allow-list pass
    /// (spec §4.D "readiness gate"; `ready_for_devices` below). Gates
    /// `start_discovery` so onboarding can't race a still-empty allow-list.
    ready_for_devices: Arc<AtomicBool>,
}

impl App {
    /// Sets a property and fans out its side effects: the `fast-timer`
    /// property hook (spec §4.G) toggles the watchdog's scan cadence, and
    /// every registered driver sees the change via `property_changed`.
    pub async fn set_property(
        &self,
        key: &str,
        value: String,
        src: &str,
    ) -> gateway_core::error::Result<()> {
        self.properties.set(key, value.clone(), src).await?;

        if key == "fast-timer" {
            self.watchdog.set_fast_mode(value == "true").await;
        }

        let event = gateway_core::driver::PropertyChangeEvent {
            key: key.to_string(),
            value,
        };
        for driver in self.registry.read().await.all() {
            driver.property_changed(event.clone()).await;
        }

        Ok(())
    }

    /// Whether the allow-list has completed at least one successful
    /// download pass. `start_discovery` refuses to run until this is true.
    pub fn ready_for_devices(&self) -> bool {
        self.ready_for_devices.load(Ordering::SeqCst)
    }
}

impl App {
    pub async fn bootstrap(config: Config) -> anyhow::Result<Arc<RwLock<App>>> {
        let state_dir = std::path::PathBuf::from(
            config.state_dir.clone().unwrap_or_else(|| "/var/lib/gatewayd".to_string()),
        );
        tokio::fs::create_dir_all(&state_dir).await?;

        let properties = Arc::new(PropertyStore::load(state_dir.join("properties.xml")).await?);

        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(crate::zigbee_driver::ZigbeeDriver::new()))?;
        let registry = Arc::new(RwLock::new(registry));

        let dispatch = Arc::new(RegistryDispatch::new(registry.clone()));
        let device_db = DeviceDatabase::new(state_dir.join("devices"));
        let store = Arc::new(Store::open(dispatch, device_db).await?);

        let watchdog_interval = config
            .watchdog_scan_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));
        let watchdog = Watchdog::with_scan_interval(
            Arc::new(WatchdogBridge {
                store: store.clone(),
                registry: registry.clone(),
            }),
            watchdog_interval,
        );
        watchdog.spawn();

        let allow_list = AllowListDescriptors::new();

        let descriptors = Arc::new(DescriptorHandler::new(
            Arc::new(HyperUrlFetcher::new()),
            Arc::new(BasicDescriptorValidator),
            properties.clone(),
            state_dir.join("whitelist"),
            state_dir.join("blacklist"),
        ));

        let lifecycle = Arc::new(LifecycleOrchestrator::new(
            store.clone(),
            registry.clone(),
            watchdog.clone(),
            allow_list.clone(),
        ));

        // Reconfigure path (spec §4.F): now that `store` reloaded whatever
        // was persisted, give every stored device a chance to resynchronize
        // with its driver before the HTTP surface starts taking traffic.
        lifecycle.reconfigure_all().await;

        let radio: Arc<dyn RadioSubsystem> = Arc::new(StubRadioSubsystem::new("000d6f0000000000"));

        let zigbee = Arc::new(ZigbeeSubsystem::new(
            store.clone(),
            watchdog.clone(),
            Arc::new(OnboardingSink {
                lifecycle: lifecycle.clone(),
            }),
        ));

        let app = Arc::new(RwLock::new(App {
            config,
            store,
            registry,
            watchdog,
            descriptors,
            allow_list,
            lifecycle,
            zigbee,
            radio,
            properties,
            discovery_active: RwLock::new(HashSet::new()),
            ready_for_devices: Arc::new(AtomicBool::new(false)),
        }));

        APP.set(app.clone()).ok();
        Ok(app)
    }

    /// Spawns the long-running background loop that reloads the in-memory
    /// allow-list whenever the descriptor handler reports new content,
    /// re-runs the descriptor refresh path over onboarded devices, and
    /// consumes the one-time readiness signal that unblocks discovery
    /// (spec §4.D "readiness gate"; flow "D gates F").
    pub fn spawn_descriptor_sync(self: &Arc<RwLock<App>>) {
        let app = self.clone();
        tokio::spawn(async move {
            let mut events = app.read().await.descriptors.subscribe();
            loop {
                match events.recv().await {
                    Ok(DescriptorEvent::DescriptorsUpdated) => {
                        let app = app.read().await;
                        let whitelist_path = app
                            .config
                            .state_dir
                            .clone()
                            .map(std::path::PathBuf::from)
                            .unwrap_or_else(|| std::path::PathBuf::from("/var/lib/gatewayd"))
                            .join("whitelist");
                        app.allow_list.reload(&whitelist_path).await;
                        app.lifecycle.on_descriptors_updated().await;
                    }
                    Ok(DescriptorEvent::ReadyForDevices) => {
                        let app = app.read().await;
                        if !app.ready_for_devices.swap(true, Ordering::SeqCst) {
                            log::info!("allow-list ready, discovery unblocked");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    pub async fn apply_descriptor_sources(&self) {
        if let Some(url) = &self.config.descriptors.allow_list_url {
            self.descriptors.assign_url(ListKind::Allow, url.clone()).await;
        }
        if let Some(url) = &self.config.descriptors.deny_list_url {
            self.descriptors.assign_url(ListKind::Deny, url.clone()).await;
        }
    }
}
