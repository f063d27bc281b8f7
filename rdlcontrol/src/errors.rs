use rdlhost::HostError;
use thiserror::Error;

/// Error taxonomy surfaced to bus callers.
///
/// Every control entry point completes with exactly one of a result or one of
/// these; SOAP faults and HTTP failures from the remote renderer are folded
/// into `Transport`.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot locate an object for the specified path: {0}")]
    ObjectNotFound(String),

    #[error("unable to determine a MIME type: {0}")]
    BadMime(String),

    #[error("unable to create a host server: {0}")]
    HostFailed(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<HostError> for ControlError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::ObjectNotFound(what) => ControlError::ObjectNotFound(what),
            HostError::BadMime(what) => ControlError::BadMime(what),
            HostError::HostFailed(iface, cause) => {
                ControlError::HostFailed(format!("{}: {}", iface, cause))
            }
        }
    }
}

impl ControlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ControlError::Cancelled)
    }
}
