//! Platform collaborators: file picker, QR scanner, permissions, sharing.
//!
//! Platform callbacks typically fire on a thread the async runtime does not
//! own. Every result travels back to the session controller over a `flume`
//! channel, which can be fed from both sync and async contexts. Senders on
//! platform threads use [`hand_off`] so a stuck or absent controller never
//! pins the platform thread for longer than [`HANDOFF_TIMEOUT`].

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transfer::ReceivedFile;

/// Upper bound for delivering a platform result to the controller.
pub const HANDOFF_TIMEOUT: Duration = Duration::from_secs(10);

/// A file chosen in the platform picker.
///
/// `path` points at a temporary copy owned by this application; it is
/// removed once the send attempt finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedFile {
    /// Readable path of the picked file
    pub path: PathBuf,
    /// Display name shown to the receiver
    pub name: String,
}

/// Result of a file-pick request.
pub type PickResult = Result<PickedFile>;

/// Result of a write-permission request (`Ok(true)` when granted).
pub type PermissionResult = Result<bool>;

/// An item shared into the application from another app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedItem {
    /// A shared file, ready to send
    File {
        /// Readable path of the shared file
        path: PathBuf,
        /// Display name
        name: String,
    },
    /// Shared text
    Text(String),
}

/// Host platform services used by the session controller.
///
/// Requests return the receiving end of a channel; the platform answers on
/// it at most once. Dropping the sender without answering counts as the
/// request being abandoned.
pub trait Platform: Send + Sync + 'static {
    /// Open the file picker.
    fn pick_file(&self) -> flume::Receiver<PickResult>;

    /// Open the QR scanner. Yields the decoded text.
    fn scan_qr_code(&self) -> flume::Receiver<String>;

    /// Ask for permission to write received files.
    fn request_write_permission(&self) -> flume::Receiver<PermissionResult>;

    /// Stream of items shared into the app, if the platform supports sharing.
    fn shared_items(&self) -> Option<flume::Receiver<SharedItem>> {
        None
    }

    /// Tell the OS download manager about a completed file.
    fn notify_download_manager(&self, file: &ReceivedFile) -> Result<()>;
}

/// Deliver `value` to the controller from a platform callback thread.
///
/// Blocks for at most [`HANDOFF_TIMEOUT`]. A timeout is logged and reported
/// as [`Error::Timeout`]; the value is dropped. A disconnected receiver means
/// the request was superseded and the value is silently discarded.
pub fn hand_off<T>(tx: &flume::Sender<T>, value: T, what: &'static str) -> Result<()> {
    hand_off_within(tx, value, what, HANDOFF_TIMEOUT)
}

pub(crate) fn hand_off_within<T>(
    tx: &flume::Sender<T>,
    value: T,
    what: &'static str,
    bound: Duration,
) -> Result<()> {
    match tx.send_timeout(value, bound) {
        Ok(()) => Ok(()),
        Err(flume::SendTimeoutError::Timeout(_)) => {
            warn!("{} handoff timed out after {:?}, dropping result", what, bound);
            Err(Error::Timeout {
                what,
                secs: bound.as_secs(),
            })
        }
        Err(flume::SendTimeoutError::Disconnected(_)) => {
            debug!("{} receiver gone, dropping result", what);
            Ok(())
        }
    }
}
