use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed CFW frame: {0}")]
    Malformed(String),

    #[error("missing required header {0:?}")]
    MissingHeader(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("no client provisioned for {0}")]
    NoMatchingClient(String),

    #[error("client not authenticated")]
    Unauthenticated,

    #[error("duplicate transaction id {0:?}")]
    DuplicateTid(String),

    #[error("unknown transaction id {0:?}")]
    UnknownTid(String),

    #[error(transparent)]
    Package(#[from] mediactrl_packages::Error),

    #[error("{0}")]
    Other(String),
}
