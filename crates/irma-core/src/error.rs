use thiserror::Error;

/// Errors raised by identifier parsing, the metadata codec and the
/// collaborator implementations shipped with this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid metadata attribute: {0}")]
    InvalidMetadata(String),

    #[error("unknown credential type: {0}")]
    UnknownCredentialType(String),

    #[error("unknown public key: {issuer}-{counter}")]
    UnknownPublicKey { issuer: String, counter: u32 },

    #[error("malformed key material")]
    MalformedKey,

    #[error("trust store error: {0}")]
    TrustStore(String),

    #[error("issuance error: {0}")]
    Issuance(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
