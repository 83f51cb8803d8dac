//! Incoming file offers.
//!
//! A [`PendingOffer`] holds an announced file or directory until the user
//! decides. [`PendingOffer::accept`] walks the state machine:
//!
//! ```text
//! Offered ──> Confirming ──> PermissionPending ──> Streaming ──> Completed
//!    │             │                 │                  │
//!    └─────────────┴─────────────────┴──> Rejected      └──> Failed
//! ```
//!
//! Whenever cancel and confirm (or cancel and a permission result) are
//! ready together, cancel wins and the offer is rejected.
//!
//! Streaming writes into a `<name>.*.tmp` file in the data directory and
//! renames it into place without clobbering. Every failure path removes the
//! temp file before the error is reported.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ReceivedFile;
use crate::error::{Error, Result};
use crate::file::{self, SNIFF_LEN, ZIP_CONTENT_TYPE};
use crate::platform::PermissionResult;
use crate::progress::{ProgressReader, PROGRESS_INTERVAL};
use crate::protocol::{IncomingMessage, MessageKind};

/// Size of one copy chunk.
pub const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// State of a pending offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferState {
    /// Announced by the sender, nothing decided yet
    Offered,
    /// Waiting for the user to accept or cancel
    Confirming,
    /// Accepted, waiting for write permission
    PermissionPending,
    /// Copying the body to disk
    Streaming,
    /// Renamed into place
    Completed,
    /// Copy or rename failed
    Failed,
    /// Rejected before streaming
    Rejected,
}

impl OfferState {
    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// Whether the offer is waiting on the user or the platform.
    pub const fn awaits_user(self) -> bool {
        matches!(self, Self::Confirming | Self::PermissionPending)
    }
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offered => "offered",
            Self::Confirming => "confirming",
            Self::PermissionPending => "permission-pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Observer of an offer's progress through [`PendingOffer::accept`].
pub trait OfferHooks: Send + Sync {
    /// Called on every state transition.
    fn on_state_change(&self, _state: OfferState) {}

    /// Called with the current total while streaming.
    fn on_progress(&self, received: u64, total: u64);
}

/// Signals an offer waits on before streaming.
///
/// A closed channel counts as the user walking away.
#[derive(Debug)]
pub struct OfferGates {
    /// One message per user confirmation
    pub confirm: mpsc::Receiver<()>,
    /// Write-permission result from the platform
    pub permission: mpsc::Receiver<PermissionResult>,
}

/// An announced but not yet accepted incoming file.
pub struct PendingOffer<M> {
    message: M,
    kind: MessageKind,
    name: String,
    size: u64,
    data_dir: PathBuf,
    destination: PathBuf,
    cancel: CancellationToken,
}

impl<M> fmt::Debug for PendingOffer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOffer")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl<M> PendingOffer<M> {
    /// Name the file will be saved under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size declared by the sender.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Final path inside the data directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Whether the offer is a zipped directory.
    pub fn is_directory(&self) -> bool {
        self.kind == MessageKind::Directory
    }
}

impl<M: IncomingMessage> PendingOffer<M> {
    /// Wrap an incoming file or directory message.
    ///
    /// Directories are saved as `<name>.zip`. The scope is the parent
    /// receive's cancellation scope.
    pub fn new(message: M, data_dir: &Path, cancel: CancellationToken) -> Self {
        let kind = message.kind();
        let declared = if kind == MessageKind::Directory {
            format!("{}.zip", message.name())
        } else {
            message.name().to_string()
        };
        let name = file::sanitize_file_name(&declared);
        let destination = file::destination_path(data_dir, &name);
        let size = message.transfer_bytes();

        Self {
            message,
            kind,
            name,
            size,
            data_dir: data_dir.to_path_buf(),
            destination,
            cancel,
        }
    }

    /// Run the offer through confirmation, permission and streaming.
    ///
    /// # Errors
    ///
    /// - [`Error::DestinationExists`] or [`Error::Stat`] before confirming
    /// - [`Error::UserRejected`] on cancel or a closed gate
    /// - [`Error::PermissionDenied`] or the platform's error
    /// - [`Error::TransferAborted`], [`Error::Network`] or [`Error::Io`]
    ///   while streaming
    pub async fn accept<H: OfferHooks>(
        mut self,
        gates: &mut OfferGates,
        hooks: &H,
    ) -> Result<ReceivedFile> {
        if let Err(e) = check_destination(self.destination.clone()).await {
            tracing::warn!("{}", e);
            return Err(self.reject_with(e, hooks).await);
        }

        hooks.on_state_change(OfferState::Confirming);
        let confirmed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            signal = gates.confirm.recv() => signal.is_some(),
        };
        if !confirmed {
            return Err(self.reject_with(Error::UserRejected, hooks).await);
        }

        hooks.on_state_change(OfferState::PermissionPending);
        let permission = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::UserRejected),
            result = gates.permission.recv() => match result {
                Some(Ok(true)) => Ok(()),
                Some(Ok(false)) => Err(Error::PermissionDenied),
                Some(Err(e)) => Err(e),
                None => Err(Error::UserRejected),
            },
        };
        if let Err(e) = permission {
            return Err(self.reject_with(e, hooks).await);
        }

        hooks.on_state_change(OfferState::Streaming);
        let result = self.stream(hooks).await;
        match &result {
            Ok(received) => {
                tracing::info!("Received {} into {}", received.name, received.path.display());
                hooks.on_state_change(OfferState::Completed);
            }
            Err(e) => {
                tracing::warn!("Receive of '{}' failed: {}", self.name, e);
                hooks.on_state_change(OfferState::Failed);
            }
        }
        result
    }

    /// Decline the offer and end the parent receive.
    ///
    /// # Errors
    ///
    /// Returns the protocol's error if the rejection could not be sent.
    /// The scope is cancelled either way.
    pub async fn reject(mut self) -> Result<()> {
        let result = self.message.reject().await;
        self.cancel.cancel();
        result
    }

    async fn reject_with<H: OfferHooks>(self, error: Error, hooks: &H) -> Error {
        let name = self.name.clone();
        if let Err(e) = self.reject().await {
            tracing::warn!("Rejecting '{}' failed: {}", name, e);
        }
        hooks.on_state_change(OfferState::Rejected);
        error
    }

    async fn stream<H: OfferHooks>(&mut self, hooks: &H) -> Result<ReceivedFile> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let data_dir = self.data_dir.clone();
        let prefix = temp_prefix(&self.name);
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(&data_dir)
        })
        .await
        .map_err(|e| Error::Internal(format!("temp file task failed: {e}")))??;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let total = self.size;
        let cancel = &self.cancel;
        let publisher_scope = cancel.child_token();
        let (mut reader, updates) = ProgressReader::new(&mut self.message);

        let copy = async {
            let copied = copy_chunks(&mut reader, &mut file, cancel).await;
            let _ = reader.close();
            publisher_scope.cancel();
            copied
        };
        let (copied, ()) = tokio::join!(
            copy,
            publish_progress(updates, total, &publisher_scope, hooks)
        );

        // Dropping the temp path removes the partial file.
        let copied = copied?;
        hooks.on_progress(copied, total);
        if copied != total {
            tracing::warn!(
                "'{}' declared {} bytes but {} arrived",
                self.name,
                total,
                copied
            );
        }

        let content_type = if self.kind == MessageKind::Directory {
            ZIP_CONTENT_TYPE.to_string()
        } else {
            let header = read_header(&mut file).await?;
            file::detect_content_type(&header, &self.name)
        };
        drop(file);

        let destination = self.destination.clone();
        tokio::task::spawn_blocking(move || match temp_path.persist_noclobber(&destination) {
            Ok(()) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::DestinationExists(destination))
            }
            Err(e) => Err(Error::Io(e.error)),
        })
        .await
        .map_err(|e| Error::Internal(format!("rename task failed: {e}")))??;

        Ok(ReceivedFile {
            name: self.name.clone(),
            path: self.destination.clone(),
            content_type,
            size: copied,
        })
    }
}

/// Longest temp file prefix, in bytes.
const TEMP_PREFIX_MAX: usize = 64;

/// `<name>.` cut to at most [`TEMP_PREFIX_MAX`] bytes on a char boundary.
fn temp_prefix(name: &str) -> String {
    let mut end = name.len().min(TEMP_PREFIX_MAX - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}.", &name[..end])
}

async fn check_destination(destination: PathBuf) -> Result<()> {
    match tokio::fs::symlink_metadata(&destination).await {
        Ok(_) => Err(Error::DestinationExists(destination)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Stat {
            path: destination,
            source,
        }),
    }
}

/// Copy `reader` into `writer`, checking `cancel` before every chunk.
pub(crate) async fn copy_chunks<R, W>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::TransferAborted),
            read = reader.read(&mut buf) => read.map_err(|e| Error::Network(e.to_string()))?,
        };
        if n == 0 {
            break;
        }

        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }

    writer.flush().await?;
    Ok(copied)
}

/// Republish the latest total at most once per [`PROGRESS_INTERVAL`]
/// while `scope` is active.
async fn publish_progress<H: OfferHooks>(
    mut updates: mpsc::Receiver<u64>,
    total: u64,
    scope: &CancellationToken,
    hooks: &H,
) {
    hooks.on_progress(0, total);

    loop {
        let received = tokio::select! {
            biased;
            () = scope.cancelled() => return,
            update = updates.recv() => match update {
                Some(received) => received,
                None => return,
            },
        };

        hooks.on_progress(received, total);

        tokio::select! {
            biased;
            () = scope.cancelled() => return,
            () = tokio::time::sleep(PROGRESS_INTERVAL) => {}
        }
    }
}

async fn read_header(file: &mut tokio::fs::File) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0)).await?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut header).await?;
    Ok(header)
}
