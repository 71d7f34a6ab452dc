//! TCP session to a single Modbus server.
//!
//! A session owns the socket, a background receive task and the connection
//! state. Commands (`connect`, `read`, `disconnect`) are called on the
//! session; everything the peer sends comes back as [`SessionEvent`]s on the
//! channel returned by [`ConnectionSession::new`].

use bytes::Bytes;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::decoder::{self, DecodedValue};
use super::encoder;
use super::protocol::{DataType, ReadRequest, TransactionId, REQUEST_FRAME_LEN};
use super::sequencer::TransactionSequencer;
use crate::utils::error::{DecodeError, ModbusError};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `None` waits for the operating system's connect timeout.
    pub connect_timeout: Option<Duration>,
    /// When set, a `ResponseTimeout` event is emitted if nothing arrives
    /// within this interval after a request.
    pub response_timeout: Option<Duration>,
    /// Upper bound on waiting for the receive task during disconnect.
    pub disconnect_timeout: Duration,
    pub read_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            response_timeout: None,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// One inbound buffer as delivered by a single socket read.
#[derive(Debug, Clone)]
pub struct ReceivedData {
    /// 1-based count of buffers received on the current connection.
    pub sequence: u64,
    pub received_at: DateTime<Local>,
    /// Type of the most recent read, if any was issued.
    pub requested: Option<DataType>,
    pub raw: Bytes,
    pub outcome: Result<DecodedValue, DecodeError>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    RequestSent {
        transaction_id: TransactionId,
        request: ReadRequest,
        frame: [u8; REQUEST_FRAME_LEN],
    },
    DataReceived(ReceivedData),
    ResponseTimeout {
        transaction_id: TransactionId,
        request: ReadRequest,
    },
    ReceiveFailed(String),
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    transaction_id: TransactionId,
    request: ReadRequest,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownOrigin {
    Caller,
    ReceiveLoop,
}

#[derive(Debug)]
enum LoopExit {
    Cancelled,
    PeerClosed,
    Failed(std::io::Error),
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionShared {
    id: Uuid,
    options: SessionOptions,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Held across connect and teardown so they never interleave.
    lifecycle: Mutex<()>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: StdMutex<Option<CancellationToken>>,
    receive_task: StdMutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    sequencer: StdMutex<TransactionSequencer>,
    last_requested: StdMutex<Option<DataType>>,
    pending: StdMutex<Option<PendingRequest>>,
    request_sent: Notify,
    received_count: AtomicU64,
    peer: StdMutex<Option<String>>,
}

impl SessionShared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("[{}] state {} -> {}", self.id, previous, state);
            self.emit(SessionEvent::ConnectionStateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // A consumer that went away is not an error for the session.
        let _ = self.events.send(event);
    }

    fn pending_deadline(&self) -> Option<Instant> {
        (*lock(&self.pending)).map(|p| p.deadline)
    }

    fn expire_pending(&self) {
        if let Some(pending) = lock(&self.pending).take() {
            warn!(
                "⏰ No response to transaction {} ({})",
                pending.transaction_id, pending.request
            );
            self.emit(SessionEvent::ResponseTimeout {
                transaction_id: pending.transaction_id,
                request: pending.request,
            });
        }
    }

    fn handle_inbound(&self, raw: Bytes) {
        let sequence = self.received_count.fetch_add(1, Ordering::SeqCst) + 1;
        let requested = *lock(&self.last_requested);
        lock(&self.pending).take();

        let outcome = match requested {
            Some(data_type) => decoder::decode(&raw, data_type),
            None => Err(DecodeError::UnsupportedType),
        };
        match &outcome {
            Ok(value) => debug!("📥 [{}] #{} {}", self.id, sequence, value),
            Err(e) => debug!(
                "📥 [{}] #{} {} bytes not decoded: {}",
                self.id,
                sequence,
                raw.len(),
                e
            ),
        }

        self.emit(SessionEvent::DataReceived(ReceivedData {
            sequence,
            received_at: Local::now(),
            requested,
            raw,
            outcome,
        }));
    }

    /// Releases every connection resource. Each step is best-effort.
    ///
    /// Callers must hold `lifecycle`.
    async fn teardown(&self, origin: TeardownOrigin) {
        let state = self.state();
        let has_task = lock(&self.receive_task).is_some();
        if state == ConnectionState::Disconnected && !has_task {
            debug!("[{}] already disconnected", self.id);
            return;
        }
        self.set_state(ConnectionState::Disconnecting);

        // Close the outgoing stream first.
        let mut writer = match timeout(self.options.disconnect_timeout, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                warn!("[{}] writer still busy, skipping stream shutdown", self.id);
                None
            }
        };
        if let Some(w) = writer.as_mut() {
            match timeout(self.options.disconnect_timeout, w.shutdown()).await {
                Ok(Ok(())) => debug!("[{}] stream shut down", self.id),
                Ok(Err(e)) => debug!("[{}] stream shutdown failed: {}", self.id, e),
                Err(_) => debug!("[{}] stream shutdown timed out", self.id),
            }
        }

        let token = lock(&self.cancel).take();
        if let Some(token) = &token {
            token.cancel();
        }

        let handle = lock(&self.receive_task).take();
        if let Some(mut handle) = handle {
            match origin {
                // Running inside the task; it finishes as soon as we return.
                TeardownOrigin::ReceiveLoop => drop(handle),
                TeardownOrigin::Caller => {
                    let waited = timeout(self.options.disconnect_timeout, &mut handle).await;
                    match waited {
                        Ok(Ok(())) => debug!("[{}] receive loop stopped", self.id),
                        Ok(Err(e)) => warn!("[{}] receive loop ended abnormally: {}", self.id, e),
                        Err(_) => {
                            warn!(
                                "[{}] receive loop still running after {:?}, aborting",
                                self.id, self.options.disconnect_timeout
                            );
                            handle.abort();
                        }
                    }
                }
            }
        }

        drop(writer);
        drop(token);

        *lock(&self.last_requested) = None;
        *lock(&self.pending) = None;
        let peer = lock(&self.peer).take();

        self.set_state(ConnectionState::Disconnected);
        match peer {
            Some(peer) => info!("🔌 Disconnected from {}", peer),
            None => info!("🔌 Session {} reset", self.id),
        }
    }

    async fn teardown_from_loop(&self, cancel: &CancellationToken, generation: u64) {
        let _guard = tokio::select! {
            guard = self.lifecycle.lock() => guard,
            // An explicit disconnect already owns the teardown.
            _ = cancel.cancelled() => return,
        };
        if cancel.is_cancelled() || self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.teardown(TeardownOrigin::ReceiveLoop).await;
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn receive_loop(
    shared: Arc<SessionShared>,
    mut reader: OwnedReadHalf,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut buffer = vec![0u8; shared.options.read_buffer_size.max(1)];

    let exit = loop {
        if cancel.is_cancelled() {
            break LoopExit::Cancelled;
        }
        let deadline = shared.pending_deadline();

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break LoopExit::Cancelled,
            _ = shared.request_sent.notified() => continue,
            _ = wait_for_deadline(deadline) => {
                shared.expire_pending();
                continue;
            }
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => break LoopExit::PeerClosed,
            Ok(n) => shared.handle_inbound(Bytes::copy_from_slice(&buffer[..n])),
            Err(_) if cancel.is_cancelled() => break LoopExit::Cancelled,
            Err(e) => break LoopExit::Failed(e),
        }
    };

    drop(reader);
    match exit {
        LoopExit::Cancelled => debug!("[{}] receive loop cancelled", shared.id),
        LoopExit::PeerClosed => {
            info!("📴 [{}] Peer closed the connection", shared.id);
            shared.teardown_from_loop(&cancel, generation).await;
        }
        LoopExit::Failed(e) => {
            error!("❌ [{}] Receive failed: {}", shared.id, e);
            shared.emit(SessionEvent::ReceiveFailed(e.to_string()));
            shared.teardown_from_loop(&cancel, generation).await;
        }
    }
}

/// Modbus TCP client session. See the module docs.
pub struct ConnectionSession {
    shared: Arc<SessionShared>,
}

impl ConnectionSession {
    pub fn new(options: SessionOptions) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = SessionShared {
            id: Uuid::new_v4(),
            options,
            state_tx,
            events,
            lifecycle: Mutex::new(()),
            writer: Mutex::new(None),
            cancel: StdMutex::new(None),
            receive_task: StdMutex::new(None),
            generation: AtomicU64::new(0),
            sequencer: StdMutex::new(TransactionSequencer::new()),
            last_requested: StdMutex::new(None),
            pending: StdMutex::new(None),
            request_sent: Notify::new(),
            received_count: AtomicU64::new(0),
            peer: StdMutex::new(None),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            events_rx,
        )
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn received_count(&self) -> u64 {
        self.shared.received_count.load(Ordering::SeqCst)
    }

    pub fn last_requested(&self) -> Option<DataType> {
        *lock(&self.shared.last_requested)
    }

    pub fn peer(&self) -> Option<String> {
        lock(&self.shared.peer).clone()
    }

    /// Opens the connection and starts the receive loop.
    ///
    /// Any failure after validation leaves the session `Disconnected`.
    pub async fn connect(&self, host: &str, port: u32) -> Result<(), ModbusError> {
        let _guard = self.shared.lifecycle.lock().await;

        let current = self.shared.state();
        if current != ConnectionState::Disconnected {
            return Err(ModbusError::InvalidState(current));
        }

        match self.open(host, port).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("❌ Failed to connect to {}:{}: {}", host.trim(), port, e);
                self.shared.teardown(TeardownOrigin::Caller).await;
                Err(e)
            }
        }
    }

    async fn open(&self, host: &str, port: u32) -> Result<(), ModbusError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ModbusError::InvalidAddress(host.to_string()));
        }
        let port = match u16::try_from(port) {
            Ok(p) if p != 0 => p,
            _ => return Err(ModbusError::InvalidPort(port)),
        };

        let shared = &self.shared;
        shared.set_state(ConnectionState::Connecting);
        info!("🔌 Connecting to Modbus TCP server {}:{}", host, port);

        let connecting = TcpStream::connect((host, port));
        let connected = match shared.options.connect_timeout {
            Some(limit) => timeout(limit, connecting).await.map_err(|_| {
                ModbusError::ConnectionError(format!(
                    "{}:{}: timed out after {:?}",
                    host, port, limit
                ))
            })?,
            None => connecting.await,
        };
        let stream = connected
            .map_err(|e| ModbusError::ConnectionError(format!("{}:{}: {}", host, port, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("[{}] could not set TCP_NODELAY: {}", shared.id, e);
        }
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("{}:{}", host, port));

        let (reader, writer) = stream.into_split();
        let token = CancellationToken::new();
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        shared.received_count.store(0, Ordering::SeqCst);
        *shared.writer.lock().await = Some(writer);
        *lock(&shared.cancel) = Some(token.clone());
        *lock(&shared.peer) = Some(peer.clone());

        let handle = tokio::spawn(receive_loop(
            Arc::clone(shared),
            reader,
            token,
            generation,
        ));
        *lock(&shared.receive_task) = Some(handle);

        shared.set_state(ConnectionState::Connected);
        info!("✅ Connected to {} (session {})", peer, shared.id);
        Ok(())
    }

    /// Closes the connection. Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let _guard = self.shared.lifecycle.lock().await;
        self.shared.teardown(TeardownOrigin::Caller).await;
    }

    /// Sends one read request and returns once it is on the wire.
    ///
    /// The answer arrives later as a `DataReceived` event.
    pub async fn read(
        &self,
        address: u16,
        data_type: DataType,
    ) -> Result<TransactionId, ModbusError> {
        if !self.is_connected() {
            return Err(ModbusError::NotConnected);
        }
        let shared = &self.shared;
        let request = ReadRequest::new(address, data_type);

        let mut writer = shared.writer.lock().await;
        if !self.is_connected() {
            // A teardown that timed out on the lock left the write half here.
            if writer.take().is_some() {
                debug!("[{}] dropped write half left by teardown", shared.id);
            }
            return Err(ModbusError::NotConnected);
        }
        let stream = writer.as_mut().ok_or(ModbusError::NotConnected)?;

        let transaction_id = lock(&shared.sequencer).next();
        let frame = encoder::encode_request(transaction_id, &request);

        *lock(&shared.last_requested) = Some(data_type);
        if let Some(limit) = shared.options.response_timeout {
            *lock(&shared.pending) = Some(PendingRequest {
                transaction_id,
                request,
                deadline: Instant::now() + limit,
            });
            shared.request_sent.notify_one();
        }

        let written = match stream.write_all(&frame).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            writer.take();
            lock(&shared.pending).take();
            return Err(ModbusError::WriteError(e.to_string()));
        }
        drop(writer);

        info!("📤 Sent transaction {} ({})", transaction_id, request);
        shared.emit(SessionEvent::RequestSent {
            transaction_id,
            request,
            frame,
        });
        Ok(transaction_id)
    }

    /// Text form of [`read`](Self::read), as entered by an operator.
    pub async fn read_text(
        &self,
        address: &str,
        data_type: &str,
    ) -> Result<TransactionId, ModbusError> {
        let request = ReadRequest::parse(address, data_type)?;
        self.read(request.address, request.data_type).await
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.shared.cancel).take() {
            token.cancel();
        }
        if let Some(handle) = lock(&self.shared.receive_task).take() {
            handle.abort();
        }
    }
}
