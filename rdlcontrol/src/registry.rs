//! Keyed store of discovered devices.
//!
//! UDN → Device is a bijection; the published path index is maintained
//! alongside so bus requests can be resolved without scanning.

use std::collections::HashMap;

use crate::device::Device;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    paths: HashMap<String, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created device. Replacing an existing UDN is a logic
    /// error upstream; the stale path index entry would leak.
    pub fn insert(&mut self, device: Device) {
        debug_assert!(!self.devices.contains_key(&device.udn));
        self.paths.insert(device.path.clone(), device.udn.clone());
        self.devices.insert(device.udn.clone(), device);
    }

    pub fn remove(&mut self, udn: &str) -> Option<Device> {
        let device = self.devices.remove(udn)?;
        self.paths.remove(&device.path);
        Some(device)
    }

    pub fn get(&self, udn: &str) -> Option<&Device> {
        self.devices.get(udn)
    }

    pub fn get_mut(&mut self, udn: &str) -> Option<&mut Device> {
        self.devices.get_mut(udn)
    }

    pub fn udn_for_path(&self, path: &str) -> Option<&String> {
        self.paths.get(path)
    }

    /// Currently published device paths, in no particular order.
    pub fn paths(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdlupnp::description::{RendererDescription, ServiceEndpoint};

    fn description(udn: &str) -> RendererDescription {
        RendererDescription {
            udn: udn.to_string(),
            device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
            friendly_name: "Test".to_string(),
            manufacturer: "ACME".to_string(),
            model_name: "One".to_string(),
            avtransport: ServiceEndpoint {
                service_type: "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
                control_url: "http://192.0.2.9/control".to_string(),
                event_url: None,
            },
            connection_manager: None,
        }
    }

    fn device(udn: &str, path: &str) -> Device {
        Device::new(
            &description(udn),
            "192.0.2.1",
            path.to_string(),
            &reqwest::Client::new(),
        )
    }

    #[test]
    fn path_index_follows_the_device() {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("uuid:a", "/org/renderlink/server/0"));
        registry.insert(device("uuid:b", "/org/renderlink/server/1"));

        assert_eq!(
            registry.udn_for_path("/org/renderlink/server/0"),
            Some(&"uuid:a".to_string())
        );
        assert_eq!(registry.len(), 2);

        let removed = registry.remove("uuid:a").unwrap();
        assert_eq!(removed.path, "/org/renderlink/server/0");
        assert!(registry.udn_for_path("/org/renderlink/server/0").is_none());
        assert_eq!(registry.paths(), vec!["/org/renderlink/server/1"]);
    }

    #[test]
    fn devices_always_have_a_context() {
        let registry_device = device("uuid:a", "/org/renderlink/server/0");
        assert_eq!(registry_device.contexts.len(), 1);
        assert_eq!(registry_device.context_index("192.0.2.1"), Some(0));
        assert_eq!(registry_device.context_index("192.0.2.2"), None);
    }
}
