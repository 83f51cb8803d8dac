//! Transfer workers for Wormhole Mobile.
//!
//! A [`TransferWorker`] drives exactly one send or receive through the
//! protocol client:
//!
//! - Sends resolve to a [`SendHandle`] once the code is minted. The handle's
//!   result channel yields one terminal result later.
//! - Receives resolve to [`Received::Text`] or to a [`PendingOffer`] that
//!   waits for the user before any bytes are written.
//!
//! Every worker owns a cancellation scope. Protocol calls, status waits
//! and the receive copy loop all race against it, and cancel wins ties.
//!
//! The `spawn_*` constructors run a worker on its own task and report back
//! as [`WorkerEvent`]s tagged with the worker id, so the session controller
//! can discard events from workers it has already replaced.

pub mod offer;

pub use offer::{OfferGates, OfferHooks, OfferState, PendingOffer};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::platform::PermissionResult;
use crate::progress::Throttle;
use crate::protocol::{
    IncomingMessage, MessageKind, ProgressCallback, StatusReceiver, TransferSettings,
    WormholeClient,
};

/// What a worker does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sending a text message
    SendText,
    /// Sending a picked or shared file
    SendFile,
    /// Receiving text or a file
    Receive,
}

impl Direction {
    /// Whether this worker occupies the send slot.
    pub const fn is_send(self) -> bool {
        matches!(self, Self::SendText | Self::SendFile)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendText => write!(f, "send-text"),
            Self::SendFile => write!(f, "send-file"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// A file written to the data directory by a completed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Name the file was saved under
    pub name: String,
    /// Final path
    pub path: PathBuf,
    /// Sniffed content type
    pub content_type: String,
    /// Bytes written
    pub size: u64,
}

/// The code of a started send and its pending terminal result.
#[derive(Debug)]
pub struct SendHandle {
    /// Code the receiver has to enter
    pub code: String,
    /// Yields exactly one terminal result
    pub result: oneshot::Receiver<Result<()>>,
}

/// Outcome of a successful receive call.
pub enum Received<M> {
    /// A text message, read in full
    Text(String),
    /// A file or directory waiting for the user to accept it
    Offer(PendingOffer<M>),
}

impl<M> fmt::Debug for Received<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Offer(offer) => f.debug_tuple("Offer").field(&offer.name()).finish(),
        }
    }
}

/// Terminal success of a spawned receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A text message was received
    Text(String),
    /// A file was received and renamed into place
    File(ReceivedFile),
}

/// An event reported by a spawned worker.
#[derive(Debug)]
pub struct WorkerEvent {
    /// Worker that produced the event
    pub worker: Uuid,
    /// What happened
    pub kind: WorkerEventKind,
}

/// Payload of a [`WorkerEvent`].
#[derive(Debug)]
pub enum WorkerEventKind {
    /// A send minted its code
    Code(String),
    /// Send progress (throttled)
    SendProgress {
        /// Bytes handed to the protocol
        sent: u64,
        /// Total bytes
        total: u64,
    },
    /// A receive produced a file offer
    Offer {
        /// Name the file would be saved under
        name: String,
        /// Declared size in bytes
        size: u64,
        /// Final path
        destination: PathBuf,
    },
    /// The pending offer moved to a new state
    OfferState(OfferState),
    /// Receive progress (throttled)
    ReceiveProgress {
        /// Bytes written so far
        received: u64,
        /// Declared total
        total: u64,
    },
    /// A send is done; no further events follow
    SendFinished(Result<()>),
    /// A receive is done; no further events follow
    ReceiveFinished(Result<Completion>),
}

/// Controller-side handle of a spawned worker.
///
/// Dropping the handle closes the confirm and permission gates, which
/// rejects a pending offer.
#[derive(Debug)]
pub struct WorkerHandle {
    id: Uuid,
    direction: Direction,
    cancel: CancellationToken,
    confirm_tx: Option<mpsc::Sender<()>>,
    permission_tx: Option<mpsc::Sender<PermissionResult>>,
}

impl WorkerHandle {
    /// Worker id carried by all of its events.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// What the worker does.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Trigger the worker's cancellation scope. Never blocks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Confirm a pending offer.
    ///
    /// Returns `false` when the signal was dropped because one is already
    /// queued or the worker is not receiving.
    pub fn confirm(&self) -> bool {
        self.confirm_tx
            .as_ref()
            .is_some_and(|tx| tx.try_send(()).is_ok())
    }

    /// Forward a write-permission result to the worker.
    pub fn deliver_permission(&self, result: PermissionResult) -> bool {
        self.permission_tx
            .as_ref()
            .is_some_and(|tx| tx.try_send(result).is_ok())
    }
}

/// Sends events for one worker.
#[derive(Debug, Clone)]
struct EventSink {
    worker: Uuid,
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    fn emit(&self, kind: WorkerEventKind) {
        if self
            .tx
            .send(WorkerEvent {
                worker: self.worker,
                kind,
            })
            .is_err()
        {
            tracing::debug!("Controller gone, dropping event from worker {}", self.worker);
        }
    }
}

impl OfferHooks for EventSink {
    fn on_state_change(&self, state: OfferState) {
        self.emit(WorkerEventKind::OfferState(state));
    }

    fn on_progress(&self, received: u64, total: u64) {
        self.emit(WorkerEventKind::ReceiveProgress { received, total });
    }
}

/// One send or receive operation.
pub struct TransferWorker<C> {
    client: Arc<C>,
    settings: TransferSettings,
    direction: Direction,
    id: Uuid,
    cancel: CancellationToken,
}

impl<C> fmt::Debug for TransferWorker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferWorker")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C: WormholeClient> TransferWorker<C> {
    /// Create a worker with a fresh cancellation scope.
    pub fn new(client: Arc<C>, settings: TransferSettings, direction: Direction) -> Self {
        Self {
            client,
            settings,
            direction,
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    /// Worker id.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// What the worker does.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// The worker's cancellation scope.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trigger the cancellation scope.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Offer a text message.
    ///
    /// # Errors
    ///
    /// Fails if the handshake fails before a code is minted, or with
    /// [`Error::TransferAborted`] if cancelled first.
    pub async fn send_text(&self, message: String) -> Result<SendHandle> {
        tracing::debug!("Worker {} sending {} bytes of text", self.id, message.len());

        let call = self
            .client
            .send_text(&self.settings, self.cancel.clone(), message);
        let (code, status) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::TransferAborted),
            result = call => result?,
        };

        Ok(SendHandle {
            code,
            result: self.watch_status(status, None),
        })
    }

    /// Offer the file at `path` under `name`.
    ///
    /// `path` is removed once the attempt finishes, whatever the outcome.
    /// `progress` receives `(sent, total)` at most every 500 ms, plus the
    /// final update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileOpen`] if the file cannot be opened, the
    /// handshake error if no code could be minted, or
    /// [`Error::TransferAborted`] if cancelled first.
    pub async fn send_file(
        &self,
        path: &Path,
        name: String,
        progress: ProgressCallback,
    ) -> Result<SendHandle> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(source) => {
                remove_source(path).await;
                return Err(Error::FileOpen {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        tracing::debug!("Worker {} sending file {} as '{}'", self.id, path.display(), name);

        let throttle = Mutex::new(Throttle::default());
        let throttled: ProgressCallback = Arc::new(move |sent, total| {
            let emit = throttle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .should_emit(sent, total);
            if emit {
                progress(sent, total);
            }
        });

        let call = self.client.send_file(
            &self.settings,
            self.cancel.clone(),
            name,
            Box::new(file),
            throttled,
        );
        let started = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::TransferAborted),
            result = call => result,
        };

        match started {
            Ok((code, status)) => Ok(SendHandle {
                code,
                result: self.watch_status(status, Some(path.to_path_buf())),
            }),
            Err(e) => {
                remove_source(path).await;
                Err(e)
            }
        }
    }

    /// Connect to the sender holding `code`.
    ///
    /// Text is read in full. Files and directories become a
    /// [`PendingOffer`] targeting `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns the protocol error, a [`Error::Network`] error if the text
    /// body cannot be read, or [`Error::TransferAborted`] if cancelled.
    pub async fn receive(&self, code: String, data_dir: &Path) -> Result<Received<C::Message>> {
        tracing::debug!("Worker {} receiving with code {}", self.id, code);

        let call = self
            .client
            .receive(&self.settings, self.cancel.clone(), code);
        let mut message = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::TransferAborted),
            result = call => result?,
        };

        match message.kind() {
            MessageKind::Text => {
                let mut text = String::new();
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(Error::TransferAborted),
                    result = message.read_to_string(&mut text) => {
                        result.map_err(|e| Error::Network(e.to_string()))?;
                    }
                }
                Ok(Received::Text(text))
            }
            MessageKind::File | MessageKind::Directory => Ok(Received::Offer(PendingOffer::new(
                message,
                data_dir,
                self.cancel.clone(),
            ))),
        }
    }

    /// Wait for the protocol status without blocking the caller.
    fn watch_status(
        &self,
        status: StatusReceiver,
        cleanup: Option<PathBuf>,
    ) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let cancel = self.cancel.clone();
        let id = self.id;

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::TransferAborted),
                status = status => status.unwrap_or_else(|_| {
                    Err(Error::Network("protocol dropped the send status".to_string()))
                }),
            };

            if let Some(path) = cleanup {
                remove_source(&path).await;
            }

            match &result {
                Ok(()) => tracing::info!("Worker {} send complete", id),
                Err(e) => tracing::info!("Worker {} send ended: {}", id, e),
            }

            let _ = tx.send(result);
        });

        rx
    }

    /// Run a text send on its own task.
    pub fn spawn_send_text(
        self,
        message: String,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> WorkerHandle {
        let sink = EventSink {
            worker: self.id,
            tx: events,
        };
        let (id, direction, cancel) = (self.id, self.direction, self.cancel.clone());

        tokio::spawn(async move {
            let result = match self.send_text(message).await {
                Ok(handle) => finish_send(handle, &sink).await,
                Err(e) => Err(e),
            };
            sink.emit(WorkerEventKind::SendFinished(result));
        });

        WorkerHandle {
            id,
            direction,
            cancel,
            confirm_tx: None,
            permission_tx: None,
        }
    }

    /// Run a file send on its own task.
    pub fn spawn_send_file(
        self,
        path: PathBuf,
        name: String,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> WorkerHandle {
        let sink = EventSink {
            worker: self.id,
            tx: events,
        };
        let (id, direction, cancel) = (self.id, self.direction, self.cancel.clone());

        tokio::spawn(async move {
            let progress_sink = sink.clone();
            let progress: ProgressCallback = Arc::new(move |sent, total| {
                progress_sink.emit(WorkerEventKind::SendProgress { sent, total });
            });

            let result = match self.send_file(&path, name, progress).await {
                Ok(handle) => finish_send(handle, &sink).await,
                Err(e) => Err(e),
            };
            sink.emit(WorkerEventKind::SendFinished(result));
        });

        WorkerHandle {
            id,
            direction,
            cancel,
            confirm_tx: None,
            permission_tx: None,
        }
    }

    /// Run a receive on its own task.
    ///
    /// A file offer waits on the handle's confirm and permission gates.
    pub fn spawn_receive(
        self,
        code: String,
        data_dir: PathBuf,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> WorkerHandle {
        let sink = EventSink {
            worker: self.id,
            tx: events,
        };
        let (id, direction, cancel) = (self.id, self.direction, self.cancel.clone());
        let (confirm_tx, confirm_rx) = mpsc::channel(1);
        let (permission_tx, permission_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let result = match self.receive(code, &data_dir).await {
                Ok(Received::Text(text)) => Ok(Completion::Text(text)),
                Ok(Received::Offer(offer)) => {
                    sink.emit(WorkerEventKind::Offer {
                        name: offer.name().to_string(),
                        size: offer.size(),
                        destination: offer.destination().to_path_buf(),
                    });
                    let mut gates = OfferGates {
                        confirm: confirm_rx,
                        permission: permission_rx,
                    };
                    offer
                        .accept(&mut gates, &sink)
                        .await
                        .map(Completion::File)
                }
                Err(e) => Err(e),
            };
            sink.emit(WorkerEventKind::ReceiveFinished(result));
        });

        WorkerHandle {
            id,
            direction,
            cancel,
            confirm_tx: Some(confirm_tx),
            permission_tx: Some(permission_tx),
        }
    }
}

/// Report the code, then wait for the terminal result.
async fn finish_send(handle: SendHandle, sink: &EventSink) -> Result<()> {
    sink.emit(WorkerEventKind::Code(handle.code));
    match handle.result.await {
        Ok(result) => result,
        Err(_) => Err(Error::Internal("send watcher exited without a result".to_string())),
    }
}

/// Remove a send source; a missing file is not an error.
pub(crate) async fn remove_source(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed send source {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove send source {}: {}", path.display(), e),
    }
}
