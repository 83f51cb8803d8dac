//! UI-visible session state and the events that drive it.
//!
//! [`Session`] is owned by one [`SessionController`]; front-ends only ever
//! see clones of it published on a `watch` channel, and talk back by sending
//! [`UiEvent`]s through a [`SessionHandle`].

mod controller;

pub use controller::SessionController;

use std::path::PathBuf;

use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};

/// Status shown when a second transfer is started in a busy slot.
pub const BUSY_STATUS: &str = "A transfer is already in progress";

/// Progress of the send slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendPhase {
    /// Nothing being sent
    #[default]
    Idle,
    /// A send is running
    Sending,
}

/// Progress of the receive slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceivePhase {
    /// Nothing being received
    #[default]
    Idle,
    /// Connecting to the sender
    Connecting,
    /// A file was announced, destination being checked
    Offered,
    /// Waiting for the user to accept
    Confirming,
    /// Waiting for write permission
    PermissionPending,
    /// Writing the file
    Streaming,
}

/// The file announced by the current receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferInfo {
    /// Name the file will be saved under
    pub name: String,
    /// Declared size in bytes
    pub size: u64,
    /// Final path
    pub destination: PathBuf,
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Rendezvous URL field
    pub rendezvous_url: String,
    /// Code length field (0 for the protocol default)
    pub code_length: u32,
    /// One-line status message
    pub status: String,
    /// What the user can try after the last failure
    pub hint: Option<String>,
    /// Send slot phase
    pub send_phase: SendPhase,
    /// Receive slot phase
    pub receive_phase: ReceivePhase,
    /// Code of the running send
    pub send_code: String,
    /// Send-text field, prefilled by shared text
    pub send_text: String,
    /// Last text message received
    pub received_text: String,
    /// Receive-code field
    pub receive_code: String,
    /// Offer of the running receive
    pub offer: Option<OfferInfo>,
}

impl Session {
    /// True from the start of any operation until its terminal result.
    pub fn transfer_in_progress(&self) -> bool {
        self.send_phase != SendPhase::Idle || self.receive_phase != ReceivePhase::Idle
    }

    /// True only while an offer waits for the user or for permission.
    pub fn confirm_in_progress(&self) -> bool {
        matches!(
            self.receive_phase,
            ReceivePhase::Confirming | ReceivePhase::PermissionPending
        )
    }
}

/// Which slot a cancel applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The running send
    Send,
    /// The running receive
    Receive,
}

/// Events sent by the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Send a text message
    SendText(String),
    /// Open the file picker; the picked file is sent
    PickFile,
    /// Open the QR scanner to fill the receive code
    ScanQr,
    /// Receive with the given code
    Receive(String),
    /// Accept the pending offer
    Accept,
    /// Cancel one slot
    Cancel(Slot),
    /// Cancel everything running
    CancelAll,
    /// Rendezvous URL field edited
    SetRendezvousUrl(String),
    /// Code length field edited
    SetCodeLength(String),
    /// Receive-code field edited
    ReceiveCodeEdited(String),
    /// Send-text field edited
    SendTextEdited(String),
    /// Stop the controller
    Quit,
}

/// Front-end side of a running controller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<UiEvent>,
    session: watch::Receiver<Session>,
}

impl SessionHandle {
    /// Deliver a UI event. Never blocks.
    ///
    /// # Errors
    ///
    /// Fails once the controller has stopped.
    pub fn send(&self, event: UiEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::Internal("session controller stopped".to_string()))
    }

    /// Latest published session state.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Receiver that wakes on every published change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }
}
