//! Error taxonomy for the synchronization core.
//!
//! Nothing here is fatal to the process. The orchestrator decides per
//! category whether an error is surfaced, logged-and-dropped, or suppressed.

use crate::session::SessionState;

/// Connection-level failures (connect refused, socket error, send on a
/// closed channel).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("transport not open")]
    NotOpen,

    #[error("send failed: {0}")]
    Send(String),

    #[error("socket error: {0}")]
    Socket(String),
}

/// A server message that could not be understood. The message is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message '{0}'")]
    UnknownMessage(String),

    #[error("malformed '{event}' payload: {reason}")]
    Malformed { event: String, reason: String },

    #[error("update carries {found} but reconciler is configured for {expected}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },
}

impl ProtocolError {
    pub fn malformed(event: &str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            event: event.to_string(),
            reason: err.to_string(),
        }
    }
}

/// A descriptor referenced a sprite the catalog does not hold.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssetError {
    #[error("unknown sprite '{name}'")]
    UnknownSprite { name: String },

    #[error("sprite '{name}' has no animation '{animation}'")]
    UnknownAnimation { name: String, animation: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
