//! # rdlhost - host-file HTTP servers for Renderlink
//!
//! Bus clients can ask the daemon to "host" a local file so that a remote
//! renderer can stream it back over HTTP. One server is bound per network
//! interface (so the URL handed to a renderer is reachable on the L2 it was
//! discovered on); each served file is memory-mapped once and shared by every
//! in-flight response through a reference count.
//!
//! Cascading teardown: removing the last client of a file removes the file,
//! removing the last file of a server closes its listener and removes the
//! server.

mod errors;
mod file;
mod server;
mod service;

pub use errors::HostError;
pub use service::HostService;

/// Prefix under which hosted files are published.
pub const HOST_ROOT: &str = "/rendererserviceupnp";
