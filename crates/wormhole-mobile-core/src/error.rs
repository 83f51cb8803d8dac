//! Error types for Wormhole Mobile.
//!
//! This module provides a unified error type for all session operations,
//! with specific error variants for different failure modes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for Wormhole Mobile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Wormhole Mobile.
#[derive(Error, Debug)]
pub enum Error {
    /// Code exchange or key agreement failed before a transfer started
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Relay or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// The operation was cancelled while it was running
    #[error("transfer mid-stream aborted")]
    TransferAborted,

    /// The file picked for sending could not be opened
    #[error("open file '{path}' failed: {source}")]
    FileOpen {
        /// Path that could not be opened
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Refusing to overwrite an existing file
    #[error("refusing to overwrite existing '{}'", .0.display())]
    DestinationExists(PathBuf),

    /// The destination path could not be checked
    #[error("cannot stat '{path}': {source}")]
    Stat {
        /// Destination that was checked
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Write permission was not granted
    #[error("write file permission not granted")]
    PermissionDenied,

    /// The user rejected or cancelled the transfer
    #[error("transfer rejected")]
    UserRejected,

    /// A newer pick request replaced an unresolved one
    #[error("new pick request has taken precedence")]
    PrecedenceSuperseded,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A cross-thread handoff exceeded its bound
    #[error("{what} handoff timed out after {secs} seconds")]
    Timeout {
        /// What was being handed off
        what: &'static str,
        /// Bound in seconds
        secs: u64,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid wormhole code or code URI
    #[error("invalid code: {0}")]
    InvalidCode(String),

    /// The progress reader was already closed
    #[error("progress reader already closed")]
    ReaderClosed,

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether this error was caused by the user (cancel, reject,
    /// denied permission) rather than by a failure.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::TransferAborted | Self::UserRejected | Self::PermissionDenied
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DestinationExists(_) => {
                Some("Delete or rename the existing file, then receive again.")
            }
            Self::Handshake(_) => Some("Check the code with the sender and try again."),
            Self::Network(_) => Some("Check your connection or the rendezvous URL in settings."),
            Self::PermissionDenied => Some("Allow storage access to save received files."),
            _ => None,
        }
    }
}
