//! Unified error kinds surfaced by the engine.
//!
//! Each module defines the error it actually produces (`protocol::ClientError`,
//! `ConfigError`, ...); this type is what a collector or the Supervisor sees
//! at the boundary, matching the kinds enumerated in the design (see the
//! error-handling table): `Unreachable`, `HandshakeFailed`, `Disconnected`,
//! `ProtocolError`, `Timeout`, `TargetGone`, `DomainUnavailable`, `QueueDrop`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("debug endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("handshake with debug endpoint failed: {0}")]
    HandshakeFailed(String),

    #[error("connection to browser lost")]
    Disconnected,

    #[error("protocol error {code}: {message}")]
    ProtocolError { code: i64, message: String },

    #[error("call timed out")]
    Timeout,

    #[error("target gone before attach completed")]
    TargetGone,

    #[error("domain {domain} unavailable: {reason}")]
    DomainUnavailable { domain: String, reason: String },

    #[error("writer queue dropped a record for ({host}, {stream})")]
    QueueDrop { host: String, stream: String },
}

impl From<crate::protocol::client::ClientError> for EngineError {
    fn from(e: crate::protocol::client::ClientError) -> Self {
        use crate::protocol::client::ClientError;
        match e {
            ClientError::Unreachable(s) => EngineError::Unreachable(s),
            ClientError::HandshakeFailed(s) => EngineError::HandshakeFailed(s),
            ClientError::Disconnected => EngineError::Disconnected,
            ClientError::Protocol { code, message } => {
                EngineError::ProtocolError { code, message }
            }
            ClientError::Timeout => EngineError::Timeout,
        }
    }
}
