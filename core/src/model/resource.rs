use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::Uri;

bitflags! {
    /// Access/behavior bits for a [`Resource`] (spec §3).
    #[derive(Default, Serialize, Deserialize)]
    #[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
    #[serde(transparent)]
    pub struct ResourceMode: u8 {
        const READABLE       = 0b0000_0001;
        const WRITEABLE      = 0b0000_0010;
        const DYNAMIC        = 0b0000_0100;
        const EMIT_EVENTS    = 0b0000_1000;
        const LAZY_SAVE_NEXT = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum CachingPolicy {
    Never,
    Always,
}

/// Who owns a resource: a device directly, or one of its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum ResourceOwner {
    Device { uuid: String },
    Endpoint { uuid: String, endpoint_id: String },
}

impl ResourceOwner {
    pub fn uri(&self) -> Uri {
        match self {
            ResourceOwner::Device { uuid } => Uri::device(uuid),
            ResourceOwner::Endpoint { uuid, endpoint_id } => Uri::endpoint(uuid, endpoint_id),
        }
    }
}

/// A named, typed, possibly-writable value on a device or endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Resource {
    pub id: String,
    /// Named semantic type: "boolean", "temperature", "string",
    /// "enum:<name>", "zoneChanged", etc. Never empty for a live resource.
    pub r#type: String,
    pub value: String,
    pub mode: ResourceMode,
    pub caching_policy: CachingPolicy,
    pub date_of_last_sync_millis: u64,
    pub owner: ResourceOwner,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        r#type: impl Into<String>,
        value: impl Into<String>,
        mode: ResourceMode,
        caching_policy: CachingPolicy,
        owner: ResourceOwner,
    ) -> Self {
        Self {
            id: id.into(),
            r#type: r#type.into(),
            value: value.into(),
            mode,
            caching_policy,
            date_of_last_sync_millis: 0,
            owner,
        }
    }

    pub fn uri(&self) -> Uri {
        let base = self.owner.uri();
        Uri(format!("{base}/r/{id}", base = base.as_str(), id = self.id))
    }

    pub fn is_writeable(&self) -> bool {
        self.mode.contains(ResourceMode::WRITEABLE)
    }

    pub fn is_readable(&self) -> bool {
        self.mode.contains(ResourceMode::READABLE)
    }

    pub fn emits_events(&self) -> bool {
        self.mode.contains(ResourceMode::EMIT_EVENTS)
    }
}
