use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key material could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A signature blob had the wrong shape for its suite.
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    /// The named suite is not supported by this build.
    #[error("unknown signature suite: {0}")]
    UnknownSuite(String),
    /// The request bytes could not be produced for signing.
    #[error(transparent)]
    Marshalling(#[from] arca_types::error::MarshallingError),
}
