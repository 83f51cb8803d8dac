//! Interface to the magic-wormhole protocol client.
//!
//! The protocol itself (code exchange, PAKE key agreement, relay connection,
//! chunked transport) lives outside this crate. This module describes what
//! the session core needs from it:
//!
//! - [`WormholeClient::send_text`] and [`WormholeClient::send_file`] return
//!   the minted code once the handshake succeeds, plus a [`StatusReceiver`]
//!   that yields exactly one terminal result.
//! - [`WormholeClient::receive`] returns an [`IncomingMessage`], which is a
//!   readable byte stream that can also be rejected.
//!
//! Every call takes a [`TransferSettings`] snapshot and a cancellation
//! token. Implementations must stop network activity soon after the token
//! fires.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Receiver for the single terminal status of a send.
pub type StatusReceiver = oneshot::Receiver<Result<()>>;

/// Byte stream handed to [`WormholeClient::send_file`].
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Progress callback invoked by the protocol with `(sent_bytes, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Per-operation protocol settings.
///
/// A fresh snapshot is taken for every transfer, so editing the settings
/// never affects transfers already in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSettings {
    /// Rendezvous server URL (`None` for the protocol default)
    pub rendezvous_url: Option<String>,
    /// Number of words in generated codes (`None` for the protocol default)
    pub code_length: Option<u32>,
}

/// Kind of an incoming wormhole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A text message
    Text,
    /// A single file
    File,
    /// A directory, transferred as a zip archive
    Directory,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// An inbound message returned by [`WormholeClient::receive`].
///
/// Reading the stream consumes the transfer body. Calling
/// [`reject`](Self::reject) declines the transfer instead.
pub trait IncomingMessage: AsyncRead + Send + Unpin + 'static {
    /// Kind of the message.
    fn kind(&self) -> MessageKind;

    /// Name declared by the sender.
    fn name(&self) -> &str;

    /// Size declared by the sender, in bytes.
    fn transfer_bytes(&self) -> u64;

    /// Decline the transfer.
    fn reject(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// A magic-wormhole protocol client.
pub trait WormholeClient: Send + Sync + 'static {
    /// Message type produced by [`receive`](Self::receive).
    type Message: IncomingMessage;

    /// Offer a text message. Resolves with the code once the handshake succeeds.
    fn send_text(
        &self,
        settings: &TransferSettings,
        cancel: CancellationToken,
        message: String,
    ) -> impl Future<Output = Result<(String, StatusReceiver)>> + Send;

    /// Offer a file named `name`, read from `reader`.
    fn send_file(
        &self,
        settings: &TransferSettings,
        cancel: CancellationToken,
        name: String,
        reader: FileReader,
        progress: ProgressCallback,
    ) -> impl Future<Output = Result<(String, StatusReceiver)>> + Send;

    /// Connect to the sender holding `code`.
    fn receive(
        &self,
        settings: &TransferSettings,
        cancel: CancellationToken,
        code: String,
    ) -> impl Future<Output = Result<Self::Message>> + Send;
}
