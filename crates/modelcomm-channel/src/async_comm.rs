use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use modelcomm_transport::{Direction, DirectTransport, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::{CommConfig, RetryConfig};
use crate::error::Result;
use crate::status::RecvStatus;

/// Frames drained from the backend per worker poll.
const MAX_FRAMES_PER_POLL: usize = 64;

/// Frames the worker may pull ahead of the application. Once full the
/// worker stops reading, so the backend fills and senders see `TryAgain`.
const INBOX_CAPACITY: usize = 8;

enum Request {
    Send { frame: Bytes, reply: mpsc::Sender<bool> },
    Count { reply: mpsc::Sender<usize> },
    Purge { reply: mpsc::Sender<usize> },
    Close { reply: mpsc::Sender<()> },
}

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    /// Frames pulled from the backend but not yet taken by the application.
    queued: AtomicUsize,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Non-blocking endpoint driven by a background worker thread.
///
/// The worker exclusively owns the [`DirectTransport`]; this handle only
/// exchanges messages with it. Send hands a frame to the worker and waits
/// for one bounded retry cycle. Receive pops frames the worker has already
/// pulled from the backend; the worker reads at most a handful of frames
/// ahead, so an idle receiver lets the backend fill.
pub struct AsyncComm {
    name: String,
    address: String,
    direction: Direction,
    owner: bool,
    max_msg_size: usize,
    poll_interval: Duration,
    requests: mpsc::Sender<Request>,
    inbox: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncComm {
    /// Open `transport` and start its worker.
    pub fn open(mut transport: Box<dyn DirectTransport>, config: &CommConfig) -> Result<Self> {
        transport.open_direct()?;
        let address = transport.address().unwrap_or_default().to_string();
        let owner = transport.is_owner();
        let max_msg_size = transport.max_msg_size();

        let (requests, request_rx) = mpsc::channel();
        let (inbox_tx, inbox) = mpsc::sync_channel(INBOX_CAPACITY);
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            name: config.name.clone(),
            transport,
            transport_open: true,
            direction: config.direction,
            retry: config.retry,
            poll_interval: config.poll_interval,
            inbox: inbox_tx,
            held: None,
            shared: Arc::clone(&shared),
        };
        let handle = thread::Builder::new()
            .name(format!("modelcomm-{}", config.name))
            .spawn(move || worker.run(request_rx))
            .map_err(TransportError::from)?;

        info!(
            name = %config.name,
            address = %address,
            direction = %config.direction,
            owner,
            "comm opened"
        );

        Ok(Self {
            name: config.name.clone(),
            address,
            direction: config.direction,
            owner,
            max_msg_size,
            poll_interval: config.poll_interval,
            requests,
            inbox,
            shared,
            worker: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved backend address.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True when this endpoint allocated the backend resource.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Per-frame ceiling of the backend.
    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// Handle that closes this endpoint from another thread, failing any
    /// in-flight wait promptly.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            name: self.name.clone(),
            requests: self.requests.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    fn request<T>(&self, make: impl FnOnce(mpsc::Sender<T>) -> Request) -> Option<T> {
        let (reply, response) = mpsc::channel();
        self.requests.send(make(reply)).ok()?;
        response.recv().ok()
    }

    /// Send one frame. False when the channel is closed or the backend
    /// stayed full through the retry cycle.
    pub fn send(&self, frame: Bytes) -> bool {
        if self.is_closed() {
            debug!(name = %self.name, "send on closed comm");
            return false;
        }
        self.request(|reply| Request::Send { frame, reply })
            .unwrap_or(false)
    }

    /// Take the next received frame without waiting.
    pub fn recv(&mut self) -> RecvStatus<Bytes> {
        match self.inbox.try_recv() {
            Ok(frame) => self.take(frame),
            Err(TryRecvError::Empty) if self.is_closed() => RecvStatus::Closed,
            Err(TryRecvError::Empty) => RecvStatus::Empty,
            Err(TryRecvError::Disconnected) => RecvStatus::Closed,
        }
    }

    /// Wait up to `timeout` for the next frame, re-checking for closure
    /// every poll interval.
    pub fn recv_timeout(&mut self, timeout: Duration) -> RecvStatus<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.recv() {
                RecvStatus::Empty => {}
                other => return other,
            }
            let now = Instant::now();
            if now >= deadline {
                return RecvStatus::TimedOut;
            }
            let wait = (deadline - now).min(self.poll_interval);
            match self.inbox.recv_timeout(wait) {
                Ok(frame) => return self.take(frame),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return RecvStatus::Closed,
            }
        }
    }

    fn take(&self, frame: Bytes) -> RecvStatus<Bytes> {
        self.shared.queued.fetch_sub(1, Ordering::AcqRel);
        RecvStatus::Received(frame)
    }

    /// Frames pending in the backend, plus frames pulled but not yet
    /// received on a receive endpoint.
    pub fn n_msg(&self) -> usize {
        let backend = self
            .request(|reply| Request::Count { reply })
            .unwrap_or(0);
        match self.direction {
            Direction::Send => backend,
            Direction::Recv => backend + self.shared.queued.load(Ordering::Acquire),
        }
    }

    /// Wait up to `timeout` for every sent frame to be consumed.
    pub fn confirm_send(&self, timeout: Duration) -> bool {
        self.wait_drained(timeout)
    }

    /// Wait up to `timeout` for every pending frame to be received.
    pub fn confirm_recv(&self, timeout: Duration) -> bool {
        self.wait_drained(timeout)
    }

    fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_closed() || self.n_msg() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Drop pending frames without processing them.
    pub fn purge(&mut self) -> usize {
        let mut purged = self
            .request(|reply| Request::Purge { reply })
            .unwrap_or(0);
        while let Ok(frame) = self.inbox.try_recv() {
            drop(self.take(frame));
            purged += 1;
        }
        debug!(name = %self.name, purged, "purged comm");
        purged
    }

    /// Close the endpoint and join its worker. Owners destroy the backend
    /// resource. Closing twice is a no-op.
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.mark_closed();
        let _ = self.request(|reply| Request::Close { reply });
        if worker.join().is_err() {
            warn!(name = %self.name, "comm worker panicked");
        }
        info!(name = %self.name, address = %self.address, "comm closed");
    }
}

impl Drop for AsyncComm {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for AsyncComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncComm")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .field("owner", &self.owner)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes an [`AsyncComm`] from another thread.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    name: String,
    requests: mpsc::Sender<Request>,
    shared: Arc<Shared>,
}

impl CloseHandle {
    /// Mark the channel closed and ask the worker to release the backend.
    /// Does not wait for the worker.
    pub fn close(&self) {
        self.shared.mark_closed();
        let (reply, _) = mpsc::channel();
        let _ = self.requests.send(Request::Close { reply });
        debug!(name = %self.name, "close requested");
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Send { frame, .. } => write!(f, "Send({} bytes)", frame.len()),
            Request::Count { .. } => f.write_str("Count"),
            Request::Purge { .. } => f.write_str("Purge"),
            Request::Close { .. } => f.write_str("Close"),
        }
    }
}

struct Worker {
    name: String,
    transport: Box<dyn DirectTransport>,
    transport_open: bool,
    direction: Direction,
    retry: RetryConfig,
    poll_interval: Duration,
    inbox: mpsc::SyncSender<Bytes>,
    /// Frame pulled while the inbox was full.
    held: Option<Bytes>,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(mut self, requests: mpsc::Receiver<Request>) {
        loop {
            match requests.recv_timeout(self.poll_interval) {
                Ok(Request::Close { reply }) => {
                    self.shutdown();
                    let _ = reply.send(());
                    return;
                }
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return;
                }
            }
            if !self.shared.is_closed() {
                self.poll();
            }
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Send { frame, reply } => {
                let sent = self.send(&frame);
                let _ = reply.send(sent);
            }
            Request::Count { reply } => {
                let count = if self.shared.is_closed() {
                    0
                } else {
                    match self.direction {
                        Direction::Send => self.transport.n_msg_direct_send(),
                        Direction::Recv => self.transport.n_msg_direct_recv(),
                    }
                };
                let _ = reply.send(count);
            }
            Request::Purge { reply } => {
                let mut purged = match self.transport.purge() {
                    Ok(purged) => purged,
                    Err(err) => {
                        warn!(name = %self.name, error = %err, "purge failed");
                        0
                    }
                };
                if self.held.take().is_some() {
                    self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                    purged += 1;
                }
                let _ = reply.send(purged);
            }
            Request::Close { .. } => {}
        }
    }

    fn send(&mut self, frame: &[u8]) -> bool {
        if self.shared.is_closed() {
            return false;
        }
        for attempt in 0..=self.retry.attempts {
            match self.transport.send_direct(frame) {
                Ok(sent) => return sent,
                Err(err) if err.is_try_again() && attempt < self.retry.attempts => {
                    debug!(name = %self.name, attempt, "queue full, backing off");
                    thread::sleep(self.retry.backoff * (attempt + 1));
                }
                Err(err) if err.is_gone() => {
                    info!(name = %self.name, "backend resource gone");
                    self.shared.mark_closed();
                    return false;
                }
                Err(err) => {
                    warn!(name = %self.name, bytes = frame.len(), error = %err, "send failed");
                    return false;
                }
            }
        }
        false
    }

    fn poll(&mut self) {
        if !self.transport.is_open_direct() {
            info!(name = %self.name, "backend resource closed");
            self.shared.mark_closed();
            return;
        }
        if self.direction != Direction::Recv {
            return;
        }
        if let Some(frame) = self.held.take() {
            if !self.deliver(frame) {
                return;
            }
        }
        for _ in 0..MAX_FRAMES_PER_POLL {
            match self.transport.recv_direct() {
                Ok(Some(frame)) => {
                    self.shared.queued.fetch_add(1, Ordering::AcqRel);
                    if !self.deliver(frame) {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) if err.is_gone() => {
                    info!(name = %self.name, "backend resource gone");
                    self.shared.mark_closed();
                    return;
                }
                Err(err) => {
                    warn!(name = %self.name, error = %err, "receive failed");
                    return;
                }
            }
        }
    }

    /// Hand a frame to the application. False when the inbox is full (the
    /// frame is held for the next poll) or the handle is gone.
    fn deliver(&mut self, frame: Bytes) -> bool {
        match self.inbox.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                trace!(name = %self.name, "inbox full, leaving frames in the backend");
                self.held = Some(frame);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn shutdown(&mut self) {
        self.shared.mark_closed();
        if !self.transport_open {
            return;
        }
        self.transport_open = false;
        if let Err(err) = self.transport.close_direct() {
            warn!(name = %self.name, error = %err, "close failed");
        }
    }
}
