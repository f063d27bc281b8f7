//! # rdlcontrol - the Renderlink control core
//!
//! Discovered MediaRenderers are published under object paths and driven
//! through a single façade:
//!
//! - [`bridge::RendererBridge`] : the façade actor owning all mutable state
//! - [`registry::DeviceRegistry`] / [`device::Device`] : UDN-keyed devices,
//!   one context per interface they were discovered on
//! - [`task`] : control requests and the exactly-once completion envelope
//! - [`avtransport`] / [`connection_manager`] : SOAP action clients
//! - [`discovery`] : SSDP → façade adapter driven by the discovery thread

pub mod avtransport;
pub mod bridge;
pub mod connection_manager;
pub mod device;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod registry;
pub mod soap_call;
pub mod task;

pub use avtransport::{AvTransportClient, PositionInfo, TransportInfo};
pub use bridge::{PATH_ROOT, RendererBridge};
pub use connection_manager::{ConnectionManagerClient, ProtocolInfo};
pub use device::{Context, Device, IFACE_DEVICE, IFACE_PLAYER, IFACE_PUSH_HOST};
pub use discovery::{DescriptionProvider, DiscoveryEvent, DiscoveryManager};
pub use errors::ControlError;
pub use events::{BridgeEvent, BridgeEventBus};
pub use registry::DeviceRegistry;
pub use task::{ControlRequest, TaskKind, TaskReply};

pub use soap_call::invoke_upnp_action;
