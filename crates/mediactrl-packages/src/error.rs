use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("package {0} already registered")]
    PackageAlreadyRegistered(String),

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("conference id already in use: {0}")]
    ConferenceIdInUse(String),

    #[error("sub-connection not found: {0}")]
    SubConnectionNotFound(String),

    #[error("codec error: {0}")]
    Codec(#[from] mediactrl_media::Error),

    #[error("{0}")]
    Other(String),
}
