use serde::{Deserialize, Serialize};

use super::{Metadata, Resource, Uri};

/// Addressable sub-unit of a device, typically one physical/logical
/// function (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Endpoint {
    pub id: String,
    pub profile: String,
    pub profile_version: u32,
    pub enabled: bool,
    pub resources: Vec<Resource>,
    pub metadata: Metadata,
    device_uuid: String,
}

impl Endpoint {
    pub fn new(device_uuid: impl Into<String>, id: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            profile: profile.into(),
            profile_version: 1,
            enabled: true,
            resources: Vec::new(),
            metadata: Metadata::new(),
            device_uuid: device_uuid.into(),
        }
    }

    pub fn uri(&self) -> Uri {
        Uri::endpoint(&self.device_uuid, &self.id)
    }

    pub fn device_uuid(&self) -> &str {
        &self.device_uuid
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }
}
