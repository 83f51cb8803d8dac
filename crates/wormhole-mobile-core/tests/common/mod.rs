//! Common test utilities for Wormhole Mobile integration tests.
//!
//! Provides a scripted protocol client, a scripted platform and helpers for
//! waiting on session state.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use wormhole_mobile_core::error::{Error, Result};
use wormhole_mobile_core::platform::{PermissionResult, PickResult, Platform, SharedItem};
use wormhole_mobile_core::protocol::{
    FileReader, IncomingMessage, MessageKind, ProgressCallback, StatusReceiver, TransferSettings,
    WormholeClient,
};
use wormhole_mobile_core::session::Session;
use wormhole_mobile_core::transfer::{OfferHooks, OfferState, ReceivedFile};

/// How long helpers wait before failing a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Names of all `.tmp` files left in `dir`.
pub fn temp_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect()
}

/// Wait until the published session satisfies `predicate`.
pub async fn wait_for_session(
    rx: &mut watch::Receiver<Session>,
    predicate: impl FnMut(&Session) -> bool,
) -> Session {
    tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("Timed out waiting for session state")
        .expect("Controller stopped")
        .clone()
}

/// Poll `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition");
}

/// One scripted step of a message body.
#[derive(Debug)]
pub enum Chunk {
    /// Bytes delivered by one read (split if the buffer is smaller)
    Data(Vec<u8>),
    /// The read fails
    Fail,
    /// The read never completes
    Stall,
}

/// Scripted incoming message.
///
/// Like real protocol streams it is `Send` but not `Sync`.
#[derive(Debug)]
pub struct MockMessage {
    kind: MessageKind,
    name: String,
    size: u64,
    chunks: VecDeque<Chunk>,
    rejects: Arc<AtomicUsize>,
    _not_sync: PhantomData<Cell<()>>,
}

impl MockMessage {
    /// A file whose body is delivered as the given chunks.
    pub fn file(name: &str, chunks: Vec<Chunk>) -> Self {
        let size = chunks
            .iter()
            .map(|c| match c {
                Chunk::Data(data) => data.len() as u64,
                _ => 0,
            })
            .sum();
        Self::new(MessageKind::File, name, size, chunks)
    }

    /// A text message.
    pub fn text(text: &str) -> Self {
        Self::new(
            MessageKind::Text,
            "",
            text.len() as u64,
            vec![Chunk::Data(text.as_bytes().to_vec())],
        )
    }

    /// A message of any kind with an explicit declared size.
    pub fn new(kind: MessageKind, name: &str, size: u64, chunks: Vec<Chunk>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            size,
            chunks: chunks.into(),
            rejects: Arc::new(AtomicUsize::new(0)),
            _not_sync: PhantomData,
        }
    }

    /// Counter of `reject()` calls, shared with clones of the test.
    pub fn reject_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.rejects)
    }
}

impl AsyncRead for MockMessage {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.chunks.pop_front() {
            None => Poll::Ready(Ok(())),
            Some(Chunk::Data(mut data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.chunks.push_front(Chunk::Data(rest));
                }
                Poll::Ready(Ok(()))
            }
            Some(Chunk::Fail) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "relay connection reset",
            ))),
            Some(Chunk::Stall) => {
                self.chunks.push_front(Chunk::Stall);
                Poll::Pending
            }
        }
    }
}

impl IncomingMessage for MockMessage {
    fn kind(&self) -> MessageKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn transfer_bytes(&self) -> u64 {
        self.size
    }

    async fn reject(&mut self) -> Result<()> {
        self.rejects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How the mock client answers sends.
#[derive(Debug, Clone)]
pub enum SendBehavior {
    /// Mint a code and report success at once
    Complete,
    /// Mint a code and keep the status open until the test resolves it
    Hold,
    /// Fail the handshake
    HandshakeFail(String),
}

/// Scripted protocol client.
#[derive(Debug)]
pub struct MockClient {
    pub send_behavior: Mutex<SendBehavior>,
    pub messages: Mutex<VecDeque<MockMessage>>,
    pub settings_seen: Mutex<Vec<TransferSettings>>,
    pub texts_sent: Mutex<Vec<String>>,
    pub files_sent: Mutex<Vec<(String, Vec<u8>)>>,
    pub held: Mutex<Vec<oneshot::Sender<Result<()>>>>,
    pub progress_chunk: usize,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            send_behavior: Mutex::new(SendBehavior::Complete),
            messages: Mutex::new(VecDeque::new()),
            settings_seen: Mutex::new(Vec::new()),
            texts_sent: Mutex::new(Vec::new()),
            files_sent: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            progress_chunk: 250,
        }
    }
}

impl MockClient {
    /// A client that answers sends with `behavior`.
    pub fn with_send(behavior: SendBehavior) -> Self {
        let client = Self::default();
        *client.send_behavior.lock().unwrap() = behavior;
        client
    }

    /// Queue a message for the next receive.
    pub fn push_message(&self, message: MockMessage) {
        self.messages.lock().unwrap().push_back(message);
    }

    fn start_send(&self, settings: &TransferSettings) -> Result<(String, StatusReceiver)> {
        self.settings_seen.lock().unwrap().push(settings.clone());

        let (tx, rx) = oneshot::channel();
        match self.send_behavior.lock().unwrap().clone() {
            SendBehavior::Complete => {
                let _ = tx.send(Ok(()));
            }
            SendBehavior::Hold => self.held.lock().unwrap().push(tx),
            SendBehavior::HandshakeFail(reason) => return Err(Error::Handshake(reason)),
        }
        Ok(("7-guitarist-revenge".to_string(), rx))
    }
}

impl WormholeClient for MockClient {
    type Message = MockMessage;

    async fn send_text(
        &self,
        settings: &TransferSettings,
        _cancel: CancellationToken,
        message: String,
    ) -> Result<(String, StatusReceiver)> {
        self.texts_sent.lock().unwrap().push(message);
        self.start_send(settings)
    }

    async fn send_file(
        &self,
        settings: &TransferSettings,
        _cancel: CancellationToken,
        name: String,
        mut reader: FileReader,
        progress: ProgressCallback,
    ) -> Result<(String, StatusReceiver)> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;

        let total = body.len() as u64;
        let mut sent = 0u64;
        for chunk in body.chunks(self.progress_chunk.max(1)) {
            sent += chunk.len() as u64;
            progress(sent, total);
        }

        self.files_sent.lock().unwrap().push((name, body));
        self.start_send(settings)
    }

    async fn receive(
        &self,
        settings: &TransferSettings,
        cancel: CancellationToken,
        _code: String,
    ) -> Result<MockMessage> {
        self.settings_seen.lock().unwrap().push(settings.clone());

        let next = self.messages.lock().unwrap().pop_front();
        match next {
            Some(message) => Ok(message),
            None => {
                cancel.cancelled().await;
                Err(Error::Network("receive cancelled".to_string()))
            }
        }
    }
}

/// Scripted platform services.
#[derive(Debug, Default)]
pub struct MockPlatform {
    pub pick_requests: Mutex<Vec<flume::Sender<PickResult>>>,
    /// For every pick after the first: whether the previous request had
    /// already been dropped by the controller
    pub previous_pick_dropped: Mutex<Vec<bool>>,
    pub qr_requests: Mutex<Vec<flume::Sender<String>>>,
    pub permission_requests: Mutex<Vec<flume::Sender<PermissionResult>>>,
    /// Answer permission requests immediately
    pub auto_permission: Option<bool>,
    pub shared: Mutex<Option<flume::Receiver<SharedItem>>>,
    pub notified: Mutex<Vec<ReceivedFile>>,
}

impl MockPlatform {
    /// A platform that grants write permission on request.
    pub fn granting() -> Self {
        Self {
            auto_permission: Some(true),
            ..Self::default()
        }
    }

    /// A platform with a share source; returns the sending side.
    pub fn sharing() -> (Self, flume::Sender<SharedItem>) {
        let (tx, rx) = flume::bounded(1);
        let platform = Self {
            shared: Mutex::new(Some(rx)),
            ..Self::granting()
        };
        (platform, tx)
    }

    pub fn pick_count(&self) -> usize {
        self.pick_requests.lock().unwrap().len()
    }

    pub fn permission_count(&self) -> usize {
        self.permission_requests.lock().unwrap().len()
    }

    /// Sender of the most recent pick request.
    pub fn last_pick(&self) -> flume::Sender<PickResult> {
        self.pick_requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no pick request issued")
    }

    /// Sender of the most recent QR request.
    pub fn last_qr(&self) -> flume::Sender<String> {
        self.qr_requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no QR request issued")
    }

    /// Sender of the most recent permission request.
    pub fn last_permission(&self) -> flume::Sender<PermissionResult> {
        self.permission_requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no permission request issued")
    }
}

impl Platform for MockPlatform {
    fn pick_file(&self) -> flume::Receiver<PickResult> {
        let (tx, rx) = flume::bounded(1);
        let mut requests = self.pick_requests.lock().unwrap();
        if let Some(previous) = requests.last() {
            self.previous_pick_dropped
                .lock()
                .unwrap()
                .push(previous.is_disconnected());
        }
        requests.push(tx);
        rx
    }

    fn scan_qr_code(&self) -> flume::Receiver<String> {
        let (tx, rx) = flume::bounded(1);
        self.qr_requests.lock().unwrap().push(tx);
        rx
    }

    fn request_write_permission(&self) -> flume::Receiver<PermissionResult> {
        let (tx, rx) = flume::bounded(1);
        if let Some(granted) = self.auto_permission {
            tx.send(Ok(granted)).unwrap();
        }
        self.permission_requests.lock().unwrap().push(tx);
        rx
    }

    fn shared_items(&self) -> Option<flume::Receiver<SharedItem>> {
        self.shared.lock().unwrap().take()
    }

    fn notify_download_manager(&self, file: &ReceivedFile) -> Result<()> {
        self.notified.lock().unwrap().push(file.clone());
        Ok(())
    }
}

/// Offer hooks that record everything and optionally cancel a scope when a
/// given state is entered.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    pub states: Mutex<Vec<OfferState>>,
    pub progress: Mutex<Vec<(u64, u64)>>,
    pub cancel_on: Option<(OfferState, CancellationToken)>,
    pub create_on_streaming: Option<PathBuf>,
}

impl RecordingHooks {
    pub fn states(&self) -> Vec<OfferState> {
        self.states.lock().unwrap().clone()
    }

    pub fn last_progress(&self) -> Option<(u64, u64)> {
        self.progress.lock().unwrap().last().copied()
    }
}

impl OfferHooks for RecordingHooks {
    fn on_state_change(&self, state: OfferState) {
        self.states.lock().unwrap().push(state);
        if let Some((trigger, token)) = &self.cancel_on {
            if *trigger == state {
                token.cancel();
            }
        }
        if state == OfferState::Streaming {
            if let Some(path) = &self.create_on_streaming {
                std::fs::write(path, b"someone else's file").unwrap();
            }
        }
    }

    fn on_progress(&self, received: u64, total: u64) {
        self.progress.lock().unwrap().push((received, total));
    }
}
