//! The data model (spec §3, component B): devices, endpoints, resources and
//! metadata, plus the store that owns the live graph and its persistence.

mod device;
mod endpoint;
mod events;
mod metadata;
mod persistence;
mod resource;
pub(crate) mod store;

pub use device::Device;
pub use endpoint::Endpoint;
pub use events::ModelEvent;
pub use metadata::Metadata;
pub use persistence::DeviceDatabase;
pub use resource::{CachingPolicy, Resource, ResourceMode, ResourceOwner};
pub use store::Store;

use std::fmt;

/// An opaque addressable URI, e.g. `/<uuid>/ep/<id>/r/<rid>`.
///
/// Kept as a thin newtype (rather than a bare `String`) so construction goes
/// through the helpers below and call sites read as intent, mirroring the
/// teacher's `Gain(f32)` style of wrapping primitives with meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Uri(pub String);

impl Uri {
    pub fn device(uuid: &str) -> Self {
        Uri(format!("/{uuid}"))
    }

    pub fn endpoint(device_uuid: &str, endpoint_id: &str) -> Self {
        Uri(format!("/{device_uuid}/ep/{endpoint_id}"))
    }

    pub fn device_resource(device_uuid: &str, resource_id: &str) -> Self {
        Uri(format!("/{device_uuid}/r/{resource_id}"))
    }

    pub fn endpoint_resource(device_uuid: &str, endpoint_id: &str, resource_id: &str) -> Self {
        Uri(format!("/{device_uuid}/ep/{endpoint_id}/r/{resource_id}"))
    }

    pub fn device_metadata(device_uuid: &str, name: &str) -> Self {
        Uri(format!("/{device_uuid}/m/{name}"))
    }

    pub fn endpoint_metadata(device_uuid: &str, endpoint_id: &str, name: &str) -> Self {
        Uri(format!("/{device_uuid}/ep/{endpoint_id}/m/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Uri(s)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri(s.to_string())
    }
}
