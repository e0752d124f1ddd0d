//! Error taxonomy for the server core
//!
//! Everything except [`ServerError::SetupFailure`] is local to the dispatch of
//! a single event: it is returned to the caller, turned into a NAK, and the
//! loop carries on.

use thiserror::Error;
use windowserver_ipc::ErrorCode;

use crate::session::WindowId;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("application {0:?} is already registered")]
    DuplicateApplication(String),

    #[error("unknown application {0:?}")]
    UnknownApplication(String),

    #[error("unknown window {0}")]
    UnknownWindow(WindowId),

    #[error("unsupported message kind {0:?}")]
    UnsupportedMessage(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Fatal: the server cannot start
    #[error("setup failed: {0}")]
    SetupFailure(String),
}

impl ServerError {
    /// Wire code for a NAK reply. `SetupFailure` never reaches a client; it is
    /// reported as malformed if it ever does.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::DuplicateApplication(_) => ErrorCode::DuplicateApplication,
            ServerError::UnknownApplication(_) => ErrorCode::UnknownApplication,
            ServerError::UnknownWindow(_) => ErrorCode::UnknownWindow,
            ServerError::UnsupportedMessage(_) => ErrorCode::UnsupportedMessage,
            ServerError::MalformedMessage(_) | ServerError::SetupFailure(_) => {
                ErrorCode::MalformedMessage
            }
        }
    }

    pub fn setup(what: &str, err: impl std::fmt::Display) -> Self {
        ServerError::SetupFailure(format!("{}: {}", what, err))
    }
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
