//! Adapter between raw SSDP traffic and the façade's discovery events.
//!
//! Lives on the blocking discovery thread: announcements are deduplicated per
//! (UDN, interface), descriptions are fetched synchronously, and the façade
//! receives already-parsed [`DiscoveryEvent`]s.

use std::collections::{HashMap, HashSet};

use rdlupnp::description::{HttpDescriptionProvider, RendererDescription};
use rdlupnp::ssdp::{SsdpEvent, SsdpEventKind, udn_from_usn};
use tracing::debug;

/// Fournit les descriptions device à partir d'une URL LOCATION.
pub trait DescriptionProvider: Send {
    /// None lorsque la description n'est pas celle d'un MediaRenderer
    /// utilisable, ou qu'elle n'a pas pu être récupérée.
    fn renderer_description(&self, location: &str) -> Option<RendererDescription>;
}

impl DescriptionProvider for HttpDescriptionProvider {
    fn renderer_description(&self, location: &str) -> Option<RendererDescription> {
        self.fetch_quietly(location)
    }
}

/// What the façade consumes: a renderer appeared on, or withdrew from, one
/// local interface.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Available {
        description: RendererDescription,
        iface_ip: String,
    },
    Unavailable {
        udn: String,
        iface_ip: String,
    },
}

#[derive(Default)]
struct EndpointState {
    interfaces: HashSet<String>,
}

/// Gestionnaire des événements SSDP → DiscoveryEvent.
pub struct DiscoveryManager<P>
where
    P: DescriptionProvider,
{
    endpoints: HashMap<String, EndpointState>,
    provider: P,
}

impl<P> DiscoveryManager<P>
where
    P: DescriptionProvider,
{
    pub fn new(provider: P) -> Self {
        Self {
            endpoints: HashMap::new(),
            provider,
        }
    }

    /// `iface_ip` is the local interface the datagram arrived on; the caller
    /// derives it from the sender address.
    pub fn handle_ssdp_event(&mut self, event: SsdpEvent, iface_ip: &str) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();

        let Some(udn) = renderer_udn(&event.usn, &event.target) else {
            return events;
        };

        match event.kind {
            SsdpEventKind::Alive { location, .. } => {
                self.handle_seen(udn, location, iface_ip, &mut events);
            }
            SsdpEventKind::Gone => {
                self.handle_byebye(&udn, &mut events);
            }
        }

        events
    }

    fn handle_seen(
        &mut self,
        udn: String,
        location: String,
        iface_ip: &str,
        events: &mut Vec<DiscoveryEvent>,
    ) {
        let endpoint = self.endpoints.entry(udn.clone()).or_default();

        if endpoint.interfaces.contains(iface_ip) {
            return;
        }

        // Fetch only for unseen (UDN, interface) pairs; a failed fetch is
        // retried on the next announcement.
        let Some(description) = self.provider.renderer_description(&location) else {
            return;
        };

        debug!("renderer {} appeared on {}", udn, iface_ip);
        endpoint.interfaces.insert(iface_ip.to_string());
        events.push(DiscoveryEvent::Available {
            description,
            iface_ip: iface_ip.to_string(),
        });
    }

    fn handle_byebye(&mut self, udn: &str, events: &mut Vec<DiscoveryEvent>) {
        let Some(endpoint) = self.endpoints.remove(udn) else {
            return;
        };

        // A byebye withdraws the device everywhere we saw it.
        for iface_ip in endpoint.interfaces {
            debug!("renderer {} withdrew from {}", udn, iface_ip);
            events.push(DiscoveryEvent::Unavailable {
                udn: udn.to_string(),
                iface_ip,
            });
        }
    }
}

fn renderer_udn(usn: &str, notification_type: &str) -> Option<String> {
    if !notification_type
        .to_ascii_lowercase()
        .contains("device:mediarenderer:")
    {
        return None;
    }

    udn_from_usn(usn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdlupnp::description::ServiceEndpoint;
    use std::net::SocketAddr;

    struct FixedProvider;

    impl DescriptionProvider for FixedProvider {
        fn renderer_description(&self, location: &str) -> Option<RendererDescription> {
            Some(RendererDescription {
                udn: "uuid:abcd".to_string(),
                device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
                friendly_name: "Test".to_string(),
                manufacturer: "ACME".to_string(),
                model_name: "One".to_string(),
                avtransport: ServiceEndpoint {
                    service_type: "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
                    control_url: format!("{}/control", location),
                    event_url: None,
                },
                connection_manager: None,
            })
        }
    }

    fn from_addr() -> SocketAddr {
        "192.0.2.10:1900".parse().unwrap()
    }

    fn alive(usn: &str, target: &str) -> SsdpEvent {
        SsdpEvent {
            usn: usn.to_string(),
            target: target.to_string(),
            origin: from_addr(),
            kind: SsdpEventKind::Alive {
                location: "http://192.0.2.10:49152/description.xml".to_string(),
                max_age: 1800,
            },
        }
    }

    const RENDERER_NT: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

    #[test]
    fn repeated_alive_yields_one_available_per_interface() {
        let mut manager = DiscoveryManager::new(FixedProvider);

        let usn = "uuid:abcd::urn:schemas-upnp-org:device:MediaRenderer:1";
        let first = manager.handle_ssdp_event(alive(usn, RENDERER_NT), "10.0.0.1");
        assert_eq!(first.len(), 1);

        let repeat = manager.handle_ssdp_event(alive(usn, RENDERER_NT), "10.0.0.1");
        assert!(repeat.is_empty());

        let second_iface = manager.handle_ssdp_event(alive(usn, RENDERER_NT), "10.0.0.2");
        assert_eq!(second_iface.len(), 1);
    }

    #[test]
    fn byebye_withdraws_every_interface() {
        let mut manager = DiscoveryManager::new(FixedProvider);
        let usn = "uuid:abcd::urn:schemas-upnp-org:device:MediaRenderer:1";

        manager.handle_ssdp_event(alive(usn, RENDERER_NT), "10.0.0.1");
        manager.handle_ssdp_event(alive(usn, RENDERER_NT), "10.0.0.2");

        let byebye = SsdpEvent {
            usn: usn.to_string(),
            target: RENDERER_NT.to_string(),
            origin: from_addr(),
            kind: SsdpEventKind::Gone,
        };
        let events = manager.handle_ssdp_event(byebye, "10.0.0.1");

        let mut ifaces: Vec<String> = events
            .iter()
            .map(|event| match event {
                DiscoveryEvent::Unavailable { iface_ip, .. } => iface_ip.clone(),
                other => panic!("expected Unavailable, got {:?}", other),
            })
            .collect();
        ifaces.sort();
        assert_eq!(ifaces, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn non_renderer_announcements_are_ignored() {
        let mut manager = DiscoveryManager::new(FixedProvider);
        let events = manager.handle_ssdp_event(
            alive("uuid:abcd::upnp:rootdevice", "upnp:rootdevice"),
            "10.0.0.1",
        );
        assert!(events.is_empty());
    }
}
