use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0} does not exist or is not a regular file")]
    ObjectNotFound(String),

    #[error("unable to determine a MIME type for {0}")]
    BadMime(String),

    #[error("unable to create a host server on {0}: {1}")]
    HostFailed(String, String),
}
