use serde::Serialize;

use super::Uri;

/// Change notifications emitted by the store (spec §6 "Events emitted").
#[derive(Debug, Clone, Serialize)]
pub enum ModelEvent {
    DeviceAdded { uuid: String },
    DeviceRemoved { uuid: String },
    EndpointAdded { uri: Uri },
    EndpointUpdated { uri: Uri },
    EndpointDisabled { uri: Uri },
    ResourceUpdated {
        uri: Uri,
        old_value: String,
        new_value: String,
        metadata_json: serde_json::Value,
    },
    CommunicationFailed { uuid: String },
    CommunicationRestored { uuid: String },
    DescriptorsUpdated,
}
