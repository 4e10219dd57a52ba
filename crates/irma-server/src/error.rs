use irma_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures surfaced to wallets and requestors.
///
/// A proof that fails to verify is not an error: the session completes with
/// an `INVALID` proof status instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown session: {0}")]
    SessionUnknown(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("protocol version not supported: {0}")]
    VersionNotSupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status the error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::MalformedInput(_) => 400,
            ServerError::InvalidRequest(_) => 400,
            ServerError::SessionUnknown(_) => 400,
            ServerError::Unsupported(_) => 501,
            ServerError::VersionNotSupported(_) => 400,
            ServerError::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::MalformedInput(_) => "MALFORMED_INPUT",
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::SessionUnknown(_) => "SESSION_UNKNOWN",
            ServerError::Unsupported(_) => "UNSUPPORTED",
            ServerError::VersionNotSupported(_) => "PROTOCOL_VERSION_NOT_SUPPORTED",
            ServerError::Internal(_) => "EXCEPTION",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ServerError::MalformedInput(_) => "Input could not be parsed",
            ServerError::InvalidRequest(_) => "Invalid request",
            ServerError::SessionUnknown(_) => "Unknown or expired session",
            ServerError::Unsupported(_) => "Unsupported by this server",
            ServerError::VersionNotSupported(_) => "Protocol version not supported",
            ServerError::Internal(_) => "Encountered unexpected problem",
        }
    }

    fn detail(&self) -> &str {
        match self {
            ServerError::MalformedInput(m)
            | ServerError::InvalidRequest(m)
            | ServerError::SessionUnknown(m)
            | ServerError::Unsupported(m)
            | ServerError::VersionNotSupported(m)
            | ServerError::Internal(m) => m,
        }
    }

    pub fn to_remote(&self) -> RemoteError {
        RemoteError {
            status: self.status(),
            error_type: self.error_type().to_string(),
            description: self.description().to_string(),
            message: self.detail().to_string(),
        }
    }
}

impl From<CoreError> for ServerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidIdentifier(_)
            | CoreError::InvalidMetadata(_)
            | CoreError::Serialization(_) => ServerError::MalformedInput(e.to_string()),
            CoreError::UnknownCredentialType(_) | CoreError::UnknownPublicKey { .. } => {
                ServerError::InvalidRequest(e.to_string())
            }
            CoreError::MalformedKey | CoreError::TrustStore(_) | CoreError::Issuance(_) => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::MalformedInput(e.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Error envelope sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    pub status: u16,
    pub error_type: String,
    pub description: String,
    pub message: String,
}
