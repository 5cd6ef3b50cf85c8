//! InitialResourceValues bag (spec §3, component C): a scratch map
//! populated during discovery that decides which resources get created
//! during onboarding, and with what seed value.

use std::collections::HashMap;

/// A key into the bag: either a device-level resource id, or an
/// endpoint-qualified `endpointId/resourceId` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Device(String),
    Endpoint(String, String),
}

impl ValueKey {
    pub fn device(resource_id: impl Into<String>) -> Self {
        ValueKey::Device(resource_id.into())
    }

    pub fn endpoint(endpoint_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        ValueKey::Endpoint(endpoint_id.into(), resource_id.into())
    }
}

/// A present key with `None` means "create the resource but unknown
/// initial content"; an absent key means the resource must not be created.
#[derive(Debug, Default, Clone)]
pub struct InitialResourceValues {
    values: HashMap<ValueKey, Option<String>>,
}

impl InitialResourceValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a value, replacing any existing entry for `key`.
    pub fn put(&mut self, key: ValueKey, value: Option<String>) {
        self.values.insert(key, value);
    }

    /// Puts a value only if `key` is absent; does not overwrite an
    /// existing entry (including a present-but-null one).
    pub fn put_if_absent(&mut self, key: ValueKey, value: Option<String>) {
        self.values.entry(key).or_insert(value);
    }

    pub fn contains(&self, key: &ValueKey) -> bool {
        self.values.contains_key(key)
    }

    /// Returns `Some(seed)` if the key is present (seed may itself be
    /// `None`, meaning "create with unknown content"), or `None` if the
    /// key is absent entirely (meaning: do not create).
    pub fn get(&self, key: &ValueKey) -> Option<Option<&str>> {
        self.values.get(key).map(|v| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// `createEndpointResourceIfAvailable` (spec §4.F step 5): creates a
/// resource on `endpoint` from the bag's seed value, or does nothing if the
/// key is absent. Returns `true` if the resource was created.
pub fn create_endpoint_resource_if_available(
    endpoint: &mut crate::model::Endpoint,
    bag: &InitialResourceValues,
    resource_id: &str,
    r#type: &str,
    mode: crate::model::ResourceMode,
    caching_policy: crate::model::CachingPolicy,
) -> bool {
    use crate::model::ResourceOwner;
    use crate::model::Resource;

    let key = ValueKey::endpoint(endpoint.id.clone(), resource_id.to_string());
    let seed = match bag.get(&key) {
        Some(seed) => seed,
        None => return false,
    };

    let value = seed.unwrap_or("").to_string();
    let owner = ResourceOwner::Endpoint {
        uuid: endpoint.device_uuid().to_string(),
        endpoint_id: endpoint.id.clone(),
    };
    endpoint
        .resources
        .push(Resource::new(resource_id, r#type, value, mode, caching_policy, owner));
    true
}

/// Device-level counterpart of [`create_endpoint_resource_if_available`].
pub fn create_device_resource_if_available(
    device: &mut crate::model::Device,
    bag: &InitialResourceValues,
    resource_id: &str,
    r#type: &str,
    mode: crate::model::ResourceMode,
    caching_policy: crate::model::CachingPolicy,
) -> bool {
    use crate::model::ResourceOwner;
    use crate::model::Resource;

    let key = ValueKey::device(resource_id.to_string());
    let seed = match bag.get(&key) {
        Some(seed) => seed,
        None => return false,
    };

    let value = seed.unwrap_or("").to_string();
    let owner = ResourceOwner::Device {
        uuid: device.uuid.clone(),
    };
    device
        .resources
        .push(Resource::new(resource_id, r#type, value, mode, caching_policy, owner));
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absent_key_means_do_not_create() {
        let bag = InitialResourceValues::new();
        assert_eq!(bag.get(&ValueKey::device("battery")), None);
    }

    #[test]
    fn present_null_means_create_unknown() {
        let mut bag = InitialResourceValues::new();
        bag.put(ValueKey::device("battery"), None);
        assert_eq!(bag.get(&ValueKey::device("battery")), Some(None));
    }

    #[test]
    fn present_value_is_seed() {
        let mut bag = InitialResourceValues::new();
        bag.put(ValueKey::endpoint("1", "faulted"), Some("false".to_string()));
        assert_eq!(
            bag.get(&ValueKey::endpoint("1", "faulted")),
            Some(Some("false"))
        );
    }

    #[test]
    fn put_if_absent_does_not_overwrite() {
        let mut bag = InitialResourceValues::new();
        bag.put(ValueKey::device("x"), Some("1".to_string()));
        bag.put_if_absent(ValueKey::device("x"), Some("2".to_string()));
        assert_eq!(bag.get(&ValueKey::device("x")), Some(Some("1")));
    }
}
