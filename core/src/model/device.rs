use serde::{Deserialize, Serialize};

use super::{Endpoint, Metadata, Resource, Uri};

/// A single physical device, normalized into `(device -> endpoints ->
/// resources)` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Device {
    pub uuid: String,
    pub device_class: String,
    pub device_class_version: u32,
    pub managing_driver_name: String,
    /// Which subsystem façade (component H) owns this device, e.g.
    /// `"zigbee"`. Not part of the spec's named attribute list; carried so
    /// the store can implement `getBySubsystem` (spec §4.B) without a
    /// secondary index keyed on driver-private state.
    pub subsystem: String,
    pub resources: Vec<Resource>,
    pub endpoints: Vec<Endpoint>,
    pub metadata: Metadata,
}

impl Device {
    pub fn new(
        uuid: impl Into<String>,
        device_class: impl Into<String>,
        device_class_version: u32,
        managing_driver_name: impl Into<String>,
        subsystem: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            device_class: device_class.into(),
            device_class_version,
            managing_driver_name: managing_driver_name.into(),
            subsystem: subsystem.into(),
            resources: Vec::new(),
            endpoints: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn uri(&self) -> Uri {
        Uri::device(&self.uuid)
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn endpoint_mut(&mut self, id: &str) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }

    /// Endpoints visible to external queries (spec §3 invariant: disabled
    /// endpoints are filtered from reads but retained in storage).
    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| e.enabled)
    }

    /// Resolves any resource on this device or one of its endpoints by uri.
    pub fn find_resource(&self, uri: &Uri) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| &r.uri() == uri)
            .or_else(|| {
                self.endpoints
                    .iter()
                    .find_map(|ep| ep.resources.iter().find(|r| &r.uri() == uri))
            })
    }

    pub fn find_resource_mut(&mut self, uri: &Uri) -> Option<&mut Resource> {
        if self.resources.iter().any(|r| &r.uri() == uri) {
            return self.resources.iter_mut().find(|r| &r.uri() == uri);
        }
        self.endpoints
            .iter_mut()
            .find_map(|ep| ep.resources.iter_mut().find(|r| &r.uri() == uri))
    }
}
