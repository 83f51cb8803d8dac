use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    OfferInfo, ReceivePhase, SendPhase, Session, SessionHandle, Slot, UiEvent, BUSY_STATUS,
};
use crate::code::{normalize_code_input, CodeUri};
use crate::config::Config;
use crate::error::Error;
use crate::file::format_bytes;
use crate::platform::{PermissionResult, PickResult, Platform, SharedItem};
use crate::protocol::{TransferSettings, WormholeClient};
use crate::transfer::{
    self, Completion, Direction, OfferState, TransferWorker, WorkerEvent, WorkerEventKind,
    WorkerHandle,
};

/// The single owner of session state.
///
/// [`run`](Self::run) multiplexes UI events, worker events and platform
/// results in one loop. Nothing else mutates the [`Session`]; every change
/// is published to the [`SessionHandle`] watchers.
pub struct SessionController<C, P> {
    client: Arc<C>,
    platform: Arc<P>,
    data_dir: PathBuf,
    config: Config,
    settings: TransferSettings,
    session: Session,
    updates: watch::Sender<Session>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    send_slot: Option<WorkerHandle>,
    receive_slot: Option<WorkerHandle>,
    pending_pick: Option<flume::Receiver<PickResult>>,
    pending_qr: Option<flume::Receiver<String>>,
    pending_permission: Option<(Uuid, flume::Receiver<PermissionResult>)>,
    shared_items: Option<flume::Receiver<SharedItem>>,
}

impl<C: WormholeClient, P: Platform> SessionController<C, P> {
    /// Create a controller using `data_dir` for configuration and received
    /// files.
    ///
    /// An unreadable configuration is logged and replaced by defaults.
    pub fn new(client: Arc<C>, platform: Arc<P>, data_dir: PathBuf) -> (Self, SessionHandle) {
        let config = Config::load(&data_dir).unwrap_or_else(|e| {
            warn!("Ignoring configuration in {}: {}", data_dir.display(), e);
            Config::default()
        });

        let session = Session {
            rendezvous_url: config.rendezvous_url.clone(),
            code_length: config.code_length,
            ..Session::default()
        };

        let (updates, session_rx) = watch::channel(session.clone());
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let shared_items = platform.shared_items();

        let controller = Self {
            client,
            platform,
            data_dir,
            settings: config.transfer_settings(),
            config,
            session,
            updates,
            ui_rx,
            worker_tx,
            worker_rx,
            send_slot: None,
            receive_slot: None,
            pending_pick: None,
            pending_qr: None,
            pending_permission: None,
            shared_items,
        };

        let handle = SessionHandle {
            events: ui_tx,
            session: session_rx,
        };

        (controller, handle)
    }

    /// Create a controller over the platform's default data directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if no home directory can be resolved.
    pub fn with_default_data_dir(
        client: Arc<C>,
        platform: Arc<P>,
    ) -> crate::Result<(Self, SessionHandle)> {
        let data_dir = Config::default_data_dir()
            .ok_or_else(|| Error::ConfigError("no application data directory".to_string()))?;
        Ok(Self::new(client, platform, data_dir))
    }

    /// Current session state.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Settings handed to the next transfer.
    pub const fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Process events until [`UiEvent::Quit`] arrives or every
    /// [`SessionHandle`] is dropped. Running transfers are cancelled on exit.
    pub async fn run(mut self) {
        info!("Session controller started, data dir {}", self.data_dir.display());

        loop {
            tokio::select! {
                event = self.ui_rx.recv() => match event {
                    Some(UiEvent::Quit) | None => break,
                    Some(event) => self.handle_ui_event(event),
                },
                Some(event) = self.worker_rx.recv() => self.handle_worker_event(event),
                result = recv_or_pending(self.pending_pick.as_ref()) => {
                    self.pending_pick = None;
                    match result {
                        Ok(result) => self.handle_pick_result(result),
                        Err(_) => debug!("File picker closed without a result"),
                    }
                }
                result = recv_or_pending(self.pending_qr.as_ref()) => {
                    self.pending_qr = None;
                    match result {
                        Ok(text) => self.handle_qr_result(&text),
                        Err(_) => debug!("QR scanner closed without a result"),
                    }
                }
                result = recv_or_pending(self.pending_permission.as_ref().map(|(_, rx)| rx)) => {
                    if let Some((worker, _)) = self.pending_permission.take() {
                        let result = result.unwrap_or_else(|_| Err(Error::PermissionDenied));
                        self.handle_permission_result(worker, result);
                    }
                }
                item = recv_or_pending(self.shared_items.as_ref()) => match item {
                    Ok(item) => self.handle_shared_item(item),
                    Err(_) => {
                        debug!("Shared item source closed");
                        self.shared_items = None;
                    }
                },
            }

            self.publish();
        }

        self.shutdown();
    }

    fn handle_ui_event(&mut self, event: UiEvent) {
        debug!("UI event: {:?}", event);

        match event {
            UiEvent::SendText(text) => self.start_send_text(text),
            UiEvent::PickFile => self.request_pick(),
            UiEvent::ScanQr => self.request_qr(),
            UiEvent::Receive(code) => self.start_receive(&code),
            UiEvent::Accept => self.accept_offer(),
            UiEvent::Cancel(slot) => self.cancel(slot),
            UiEvent::CancelAll => {
                self.cancel(Slot::Send);
                self.cancel(Slot::Receive);
            }
            UiEvent::SetRendezvousUrl(url) => self.set_rendezvous_url(url),
            UiEvent::SetCodeLength(text) => self.set_code_length(&text),
            UiEvent::ReceiveCodeEdited(text) => {
                self.session.receive_code = normalize_code_input(&text);
            }
            UiEvent::SendTextEdited(text) => self.session.send_text = text,
            UiEvent::Quit => {}
        }
    }

    fn start_send_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if self.send_slot.is_some() {
            self.set_status(BUSY_STATUS);
            return;
        }

        let worker = TransferWorker::new(
            Arc::clone(&self.client),
            self.settings.clone(),
            Direction::SendText,
        );
        info!("Starting text send {}", worker.id());

        self.session.send_text.clone_from(&text);
        self.session.send_code.clear();
        self.session.hint = None;
        self.session.send_phase = SendPhase::Sending;
        self.send_slot = Some(worker.spawn_send_text(text, self.worker_tx.clone()));
    }

    fn start_send_file(&mut self, path: PathBuf, name: String) {
        if self.send_slot.is_some() {
            debug!("Send slot busy, discarding {}", path.display());
            tokio::spawn(async move { transfer::remove_source(&path).await });
            self.set_status(BUSY_STATUS);
            return;
        }

        let worker = TransferWorker::new(
            Arc::clone(&self.client),
            self.settings.clone(),
            Direction::SendFile,
        );
        info!("Starting file send {} for '{}'", worker.id(), name);

        self.session.send_code.clear();
        self.session.hint = None;
        self.session.send_phase = SendPhase::Sending;
        self.send_slot = Some(worker.spawn_send_file(path, name, self.worker_tx.clone()));
    }

    fn request_pick(&mut self) {
        if self.send_slot.is_some() {
            self.set_status(BUSY_STATUS);
            return;
        }

        if let Some(previous) = self.pending_pick.take() {
            drop(previous);
            self.handle_pick_result(Err(Error::PrecedenceSuperseded));
        }
        self.pending_pick = Some(self.platform.pick_file());
    }

    fn handle_pick_result(&mut self, result: PickResult) {
        match result {
            Ok(picked) => {
                debug!("Picked {} as '{}'", picked.path.display(), picked.name);
                self.start_send_file(picked.path, picked.name);
            }
            Err(e) => {
                warn!("Pick file err: {}", e);
                self.set_status(format!("Pick file err: {e}"));
            }
        }
    }

    fn request_qr(&mut self) {
        if self
            .pending_qr
            .replace(self.platform.scan_qr_code())
            .is_some()
        {
            debug!("Replaced an unresolved QR scan");
        }
    }

    fn handle_qr_result(&mut self, text: &str) {
        match CodeUri::parse(text) {
            Ok(uri) => {
                debug!("Scanned code {}", uri.code);
                self.session.receive_code = uri.code;
            }
            Err(e) => {
                warn!("Scanned {:?}: {}", text, e);
                self.set_status(e.to_string());
            }
        }
    }

    fn start_receive(&mut self, code: &str) {
        if self.receive_slot.is_some() {
            self.set_status(BUSY_STATUS);
            return;
        }

        self.set_status("Start recv");
        let code = normalize_code_input(code.trim());
        if code.is_empty() {
            return;
        }

        let worker = TransferWorker::new(
            Arc::clone(&self.client),
            self.settings.clone(),
            Direction::Receive,
        );
        info!("Starting receive {}", worker.id());

        self.session.receive_code.clone_from(&code);
        self.session.offer = None;
        self.session.hint = None;
        self.session.receive_phase = ReceivePhase::Connecting;
        self.receive_slot = Some(worker.spawn_receive(
            code,
            self.data_dir.clone(),
            self.worker_tx.clone(),
        ));
    }

    fn accept_offer(&self) {
        if self.session.receive_phase != ReceivePhase::Confirming {
            debug!("Accept ignored in {:?}", self.session.receive_phase);
            return;
        }
        if let Some(handle) = &self.receive_slot {
            if !handle.confirm() {
                debug!("Confirmation already queued for {}", handle.id());
            }
        }
    }

    fn cancel(&self, slot: Slot) {
        let handle = match slot {
            Slot::Send => self.send_slot.as_ref(),
            Slot::Receive => self.receive_slot.as_ref(),
        };
        if let Some(handle) = handle {
            info!("Cancelling {} worker {}", handle.direction(), handle.id());
            handle.cancel();
        }
    }

    fn set_rendezvous_url(&mut self, url: String) {
        self.session.rendezvous_url.clone_from(&url);
        if url != self.config.rendezvous_url {
            self.config.rendezvous_url = url;
            self.save_config();
        }
    }

    fn set_code_length(&mut self, text: &str) {
        match text.trim().parse::<u32>() {
            Ok(n) if n > 0 => {
                self.session.code_length = n;
                if n != self.config.code_length {
                    self.config.code_length = n;
                    self.save_config();
                }
            }
            _ => debug!("Ignoring code length {:?}", text),
        }
    }

    fn save_config(&mut self) {
        self.settings = self.config.transfer_settings();
        if let Err(e) = self.config.save(&self.data_dir) {
            error!("Failed to save configuration: {}", e);
            self.set_status(format!("Save config err: {e}"));
        }
    }

    fn handle_shared_item(&mut self, item: SharedItem) {
        match item {
            SharedItem::Text(text) => self.session.send_text = text,
            SharedItem::File { path, name } => self.start_send_file(path, name),
        }
    }

    fn handle_permission_result(&self, worker: Uuid, result: PermissionResult) {
        match &self.receive_slot {
            Some(handle) if handle.id() == worker => {
                if !handle.deliver_permission(result) {
                    debug!("Worker {} no longer waits for permission", worker);
                }
            }
            _ => debug!("Dropping permission result for stale worker {}", worker),
        }
    }

    fn is_current(&self, worker: Uuid) -> bool {
        [&self.send_slot, &self.receive_slot]
            .into_iter()
            .flatten()
            .any(|h| h.id() == worker)
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        let WorkerEvent { worker, kind } = event;
        if !self.is_current(worker) {
            debug!("Ignoring event from stale worker {}: {:?}", worker, kind);
            return;
        }

        match kind {
            WorkerEventKind::Code(code) => {
                self.session.send_code = code;
                self.set_status("Waiting for receiver...");
            }
            WorkerEventKind::SendProgress { sent, total } => {
                self.set_status(format!(
                    "Send progress {}/{}",
                    format_bytes(sent),
                    format_bytes(total)
                ));
            }
            WorkerEventKind::Offer {
                name,
                size,
                destination,
            } => {
                self.session.receive_phase = ReceivePhase::Offered;
                self.session.offer = Some(OfferInfo {
                    name,
                    size,
                    destination,
                });
            }
            WorkerEventKind::OfferState(state) => self.handle_offer_state(worker, state),
            WorkerEventKind::ReceiveProgress { received, total } => {
                self.set_status(format!(
                    "receiving {}/{}",
                    format_bytes(received),
                    format_bytes(total)
                ));
            }
            WorkerEventKind::SendFinished(result) => self.finish_send(result),
            WorkerEventKind::ReceiveFinished(result) => self.finish_receive(result),
        }
    }

    fn handle_offer_state(&mut self, worker: Uuid, state: OfferState) {
        match state {
            OfferState::Confirming => {
                self.session.receive_phase = ReceivePhase::Confirming;
                if let Some(offer) = &self.session.offer {
                    let status = format!(
                        "Receiving file ({}) into {}\nAccept or Cancel?",
                        format_bytes(offer.size),
                        offer.name
                    );
                    self.set_status(status);
                }
            }
            OfferState::PermissionPending => {
                self.session.receive_phase = ReceivePhase::PermissionPending;
                self.pending_permission = Some((worker, self.platform.request_write_permission()));
            }
            OfferState::Streaming => self.session.receive_phase = ReceivePhase::Streaming,
            OfferState::Offered
            | OfferState::Completed
            | OfferState::Failed
            | OfferState::Rejected => {}
        }
    }

    fn finish_send(&mut self, result: crate::Result<()>) {
        let direction = self
            .send_slot
            .take()
            .map_or(Direction::SendText, |h| h.direction());

        self.session.send_phase = SendPhase::Idle;
        self.session.send_code.clear();

        let status = match result {
            Ok(()) if direction == Direction::SendText => "OK!".to_string(),
            Ok(()) => "Send Complete!".to_string(),
            Err(e) => {
                log_failure(&direction.to_string(), &e);
                self.session.hint = e.suggestion().map(str::to_string);
                send_error_status(direction, &e)
            }
        };
        self.set_status(status);
    }

    fn finish_receive(&mut self, result: crate::Result<Completion>) {
        self.receive_slot = None;
        self.pending_permission = None;

        let phase = std::mem::take(&mut self.session.receive_phase);
        self.session.offer = None;
        self.session.receive_code.clear();

        let status = match result {
            Ok(Completion::Text(text)) => {
                self.session.received_text = text;
                "Receive complete".to_string()
            }
            Ok(Completion::File(file)) => {
                debug!("Notifying download manager about {}", file.path.display());
                if let Err(e) = self.platform.notify_download_manager(&file) {
                    warn!("Download manager notification failed: {}", e);
                }
                "Receive complete".to_string()
            }
            Err(e) => {
                log_failure(&format!("receive in {phase:?}"), &e);
                self.session.hint = e.suggestion().map(str::to_string);
                receive_error_status(phase, &e)
            }
        };
        self.set_status(status);
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.session.status = status.into();
        self.publish();
    }

    fn publish(&self) {
        self.updates.send_if_modified(|current| {
            if *current == self.session {
                false
            } else {
                current.clone_from(&self.session);
                true
            }
        });
    }

    fn shutdown(&mut self) {
        for handle in [self.send_slot.take(), self.receive_slot.take()]
            .into_iter()
            .flatten()
        {
            info!("Cancelling {} worker {} on shutdown", handle.direction(), handle.id());
            handle.cancel();
        }
        info!("Session controller stopped");
    }
}

async fn recv_or_pending<T>(rx: Option<&flume::Receiver<T>>) -> Result<T, flume::RecvError> {
    match rx {
        Some(rx) => rx.recv_async().await,
        None => std::future::pending().await,
    }
}

fn log_failure(what: &str, error: &Error) {
    if error.is_user_initiated() {
        info!("{} ended by the user: {}", what, error);
    } else {
        warn!("{} failed: {}", what, error);
    }
}

fn send_error_status(direction: Direction, error: &Error) -> String {
    match (direction, error) {
        (_, Error::TransferAborted) => "Transfer mid-stream aborted".to_string(),
        (Direction::SendText, e) => format!("Send error: {e}"),
        (_, e) => format!("wormhole send err: {e}"),
    }
}

fn receive_error_status(phase: ReceivePhase, error: &Error) -> String {
    match error {
        Error::TransferAborted => "Transfer mid-stream aborted".to_string(),
        Error::UserRejected | Error::PermissionDenied => "Transfer rejected".to_string(),
        Error::DestinationExists(_) | Error::Stat { .. } => format!("Error {error}"),
        e if phase == ReceivePhase::PermissionPending => {
            format!("Write file permission not granted, err: {e}")
        }
        e if phase == ReceivePhase::Streaming => format!("Receive file error: {e}"),
        e => format!("Recv msg err: {e}"),
    }
}
