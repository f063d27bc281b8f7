//! # rdlupnp - UPnP plumbing for Renderlink
//!
//! Protocol-level building blocks used by the control façade:
//!
//! - [`ssdp`] : SSDP control-point client (M-SEARCH + NOTIFY listening)
//! - [`soap`] : SOAP request building and envelope/fault parsing
//! - [`description`] : device description fetch and parse
//! - [`gena`] : GENA event subscriptions (SUBSCRIBE / UNSUBSCRIBE) and the
//!   notify sink answering event deliveries

pub mod description;
pub mod gena;
pub mod soap;
pub mod ssdp;

pub use description::{
    DescriptionError, HttpDescriptionProvider, RendererDescription, ServiceEndpoint,
};
pub use gena::{GenaClient, GenaError, NotifySink, Subscription};
pub use ssdp::{SsdpEvent, SsdpEventKind, SsdpListener};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Device type announced by UPnP AV renderers
pub const MEDIA_RENDERER_URN: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
