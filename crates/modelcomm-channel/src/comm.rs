use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use modelcomm_frame::{envelope_bytes, split_frames, Assembled, Envelope, Metadata, Reassembler};
use modelcomm_schema::{Message, SerializeOptions, Serializer, TypeRegistry};
use modelcomm_transport::{Direction, TransportKind};
use tracing::{debug, info, warn};

use crate::async_comm::{AsyncComm, CloseHandle};
use crate::config::CommConfig;
use crate::error::{CommError, Result};
use crate::sched::Scheduled;
use crate::status::RecvStatus;

/// Typed channel endpoint: an [`AsyncComm`] plus the channel's serializer.
///
/// Messages larger than the backend's frame ceiling go through the
/// `*_nolimit` operations, which split them into frames and reassemble
/// them on receipt. Once the end-of-stream sentinel has been received,
/// later receives report [`RecvStatus::Closed`].
pub struct Comm {
    inner: AsyncComm,
    serializer: Serializer,
    reassembler: Reassembler,
    config: CommConfig,
    eof_received: bool,
    sched: Scheduled<Message>,
}

impl Comm {
    /// Open an endpoint on `kind` for `config.address`.
    pub fn new(
        kind: &TransportKind,
        registry: Arc<TypeRegistry>,
        config: CommConfig,
    ) -> Result<Self> {
        let serializer = Serializer::new(registry, config.typedef.clone())?;
        Self::with_serializer(kind, serializer, config)
    }

    /// Open an endpoint with a prepared serializer.
    pub fn with_serializer(
        kind: &TransportKind,
        serializer: Serializer,
        config: CommConfig,
    ) -> Result<Self> {
        let transport = kind.endpoint(&config.address)?;
        let inner = AsyncComm::open(transport, &config)?;
        Ok(Self {
            inner,
            serializer,
            reassembler: Reassembler::new(),
            sched: Scheduled::new(config.name.clone()),
            config,
            eof_received: false,
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Resolved backend address; hand this to the peer endpoint.
    pub fn address(&self) -> &str {
        self.inner.address()
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction()
    }

    pub fn is_owner(&self) -> bool {
        self.inner.is_owner()
    }

    pub fn max_msg_size(&self) -> usize {
        self.inner.max_msg_size()
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// True once the end-of-stream sentinel has been received.
    pub fn eof_received(&self) -> bool {
        self.eof_received
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.inner.close_handle()
    }

    fn require(&self, expected: Direction) -> Result<()> {
        if self.direction() == expected {
            Ok(())
        } else {
            Err(CommError::InvalidDirection {
                name: self.name().to_string(),
                expected,
                actual: self.direction(),
            })
        }
    }

    /// Send one message in a single frame.
    ///
    /// Returns false when the channel is closed, the backend stayed full,
    /// or the serialized message exceeds the frame ceiling.
    pub fn send(&mut self, message: &Message) -> Result<bool> {
        self.send_with(message, &SerializeOptions::default())
    }

    /// [`send`](Self::send) with explicit serialization options.
    pub fn send_with(&mut self, message: &Message, options: &SerializeOptions) -> Result<bool> {
        self.require(Direction::Send)?;
        let wire = self.serializer.serialize(message, options)?;
        if wire.len() > self.max_msg_size() {
            warn!(
                name = %self.name(),
                bytes = wire.len(),
                max = self.max_msg_size(),
                "message exceeds frame limit"
            );
            return Ok(false);
        }
        Ok(self.inner.send(wire))
    }

    /// Send a message of any size, splitting it into frames as needed.
    pub fn send_nolimit(&mut self, message: &Message) -> Result<bool> {
        self.send_nolimit_with(message, &SerializeOptions::default())
    }

    /// [`send_nolimit`](Self::send_nolimit) with explicit serialization options.
    pub fn send_nolimit_with(
        &mut self,
        message: &Message,
        options: &SerializeOptions,
    ) -> Result<bool> {
        self.require(Direction::Send)?;
        let wire = self.serializer.serialize(message, options)?;
        let frames = split_frames(&wire, self.max_msg_size())?;
        let count = frames.len();
        for (index, frame) in frames.into_iter().enumerate() {
            if !self.inner.send(frame) {
                warn!(name = %self.name(), index, count, "chunked send interrupted");
                return Ok(false);
            }
        }
        debug!(name = %self.name(), bytes = wire.len(), frames = count, "sent message");
        Ok(true)
    }

    /// Send the end-of-stream sentinel.
    pub fn send_eof(&mut self) -> Result<bool> {
        self.send(&Message::Eof)
    }

    /// Send the end-of-stream sentinel through the chunked path.
    pub fn send_nolimit_eof(&mut self) -> Result<bool> {
        self.send_nolimit(&Message::Eof)
    }

    /// Send a metadata-only envelope.
    pub(crate) fn send_metadata(&mut self, metadata: &Metadata) -> Result<bool> {
        self.require(Direction::Send)?;
        let wire = envelope_bytes(metadata, b"")?;
        Ok(self.inner.send(wire))
    }

    /// Receive one frame without waiting.
    pub fn recv(&mut self) -> Result<RecvStatus<Message>> {
        Ok(self.recv_message(None)?.map(|(message, _)| message))
    }

    /// Receive one frame, waiting up to `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<RecvStatus<Message>> {
        Ok(self.recv_message(Some(timeout))?.map(|(message, _)| message))
    }

    /// Receive one frame with its metadata. `None` does not wait.
    pub fn recv_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<RecvStatus<(Message, Metadata)>> {
        self.require(Direction::Recv)?;
        if self.eof_received {
            return Ok(RecvStatus::Closed);
        }
        let frame = match self.next_frame(timeout).take_received() {
            Ok(frame) => frame,
            Err(status) => return Ok(status),
        };
        let (message, metadata) = self.serializer.deserialize(&frame)?;
        Ok(self.observe(message, metadata))
    }

    /// Receive a whole message of any size without waiting for its first
    /// frame. Once the first frame arrives, keeps receiving until the
    /// message completes or the channel closes.
    pub fn recv_nolimit(&mut self) -> Result<RecvStatus<Message>> {
        Ok(self.recv_nolimit_message(None)?.map(|(message, _)| message))
    }

    /// [`recv_nolimit`](Self::recv_nolimit), waiting up to `timeout` for the
    /// first frame.
    pub fn recv_nolimit_timeout(&mut self, timeout: Duration) -> Result<RecvStatus<Message>> {
        Ok(self
            .recv_nolimit_message(Some(timeout))?
            .map(|(message, _)| message))
    }

    /// Chunked receive with metadata.
    pub fn recv_nolimit_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<RecvStatus<(Message, Metadata)>> {
        if self.eof_received {
            self.require(Direction::Recv)?;
            return Ok(RecvStatus::Closed);
        }
        let envelope = match self.recv_envelope(timeout)?.take_received() {
            Ok(envelope) => envelope,
            Err(status) => return Ok(status),
        };
        let (message, metadata) = self.serializer.deserialize_envelope(envelope)?;
        Ok(self.observe(message, metadata))
    }

    /// Receive and reassemble one envelope without decoding it.
    pub(crate) fn recv_envelope(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<RecvStatus<Envelope>> {
        self.require(Direction::Recv)?;
        let first = match self.next_frame(timeout).take_received() {
            Ok(frame) => frame,
            Err(status) => return Ok(status),
        };

        let mode = self.serializer.framing_mode();
        let mut assembled = self.reassembler.push(first, mode)?;
        let deadline = self.config.chunk_timeout.map(|t| Instant::now() + t);
        loop {
            let (received, expected) = match assembled {
                Assembled::Complete(envelope) => return Ok(RecvStatus::Received(envelope)),
                Assembled::Partial { received, expected } => (received, expected),
            };
            debug!(name = %self.name(), received, expected, "awaiting continuation frame");

            let wait = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.config.default_timeout,
            };
            assembled = match self.inner.recv_timeout(wait) {
                RecvStatus::Received(frame) => self.reassembler.push(frame, mode)?,
                RecvStatus::TimedOut if deadline.is_none() => {
                    Assembled::Partial { received, expected }
                }
                RecvStatus::TimedOut => {
                    warn!(name = %self.name(), received, expected, "chunked receive timed out");
                    self.reassembler.reset();
                    return Ok(RecvStatus::TimedOut);
                }
                _ => {
                    warn!(name = %self.name(), received, expected, "channel closed mid-message");
                    self.reassembler.reset();
                    return Ok(RecvStatus::Closed);
                }
            };
        }
    }

    fn next_frame(&mut self, timeout: Option<Duration>) -> RecvStatus<Bytes> {
        match timeout {
            None => self.inner.recv(),
            Some(timeout) => self.inner.recv_timeout(timeout),
        }
    }

    fn observe(&mut self, message: Message, metadata: Metadata) -> RecvStatus<(Message, Metadata)> {
        if message.is_eof() {
            info!(name = %self.name(), "end of stream received");
            self.eof_received = true;
            return RecvStatus::Eof;
        }
        RecvStatus::Received((message, metadata))
    }

    /// Non-blocking receive flattened to `(flag, payload)`. End of stream
    /// reports `(false, Some(Message::Eof))`.
    pub fn recv_flagged(&mut self) -> Result<(bool, Option<Message>)> {
        Ok(match self.recv()? {
            RecvStatus::Eof => (false, Some(Message::Eof)),
            status => status.into_flagged(),
        })
    }

    /// Chunked counterpart of [`recv_flagged`](Self::recv_flagged).
    pub fn recv_nolimit_flagged(&mut self) -> Result<(bool, Option<Message>)> {
        Ok(match self.recv_nolimit()? {
            RecvStatus::Eof => (false, Some(Message::Eof)),
            status => status.into_flagged(),
        })
    }

    /// Wait up to the default timeout for a chunked message and report
    /// whether it was the end-of-stream sentinel.
    pub fn recv_nolimit_eof(&mut self) -> Result<bool> {
        let timeout = self.config.default_timeout;
        Ok(self.recv_nolimit_timeout(timeout)?.is_eof())
    }

    /// Frames pending on this endpoint.
    pub fn n_msg(&self) -> usize {
        self.inner.n_msg()
    }

    pub fn confirm_send(&self, timeout: Duration) -> bool {
        self.inner.confirm_send(timeout)
    }

    pub fn confirm_recv(&self, timeout: Duration) -> bool {
        self.inner.confirm_recv(timeout)
    }

    /// Drop pending frames and any partially received message.
    pub fn purge(&mut self) -> usize {
        self.reassembler.reset();
        self.inner.purge()
    }

    /// Close the endpoint. Owners destroy the backend resource.
    pub fn close(&mut self) {
        self.reassembler.reset();
        self.inner.close();
    }

    /// Run `task` on a background thread after `delay`.
    pub fn sched_task<F>(&mut self, delay: Duration, task: F) -> Result<()>
    where
        F: FnOnce() -> (bool, Option<Message>) + Send + 'static,
    {
        self.sched.schedule(delay, task)
    }

    /// Wait for the scheduled task and take its `(flag, result)`.
    pub fn sched_out(&mut self) -> Option<(bool, Option<Message>)> {
        self.sched.take()
    }
}

#[cfg(feature = "async")]
impl Comm {
    /// Receive one frame, polling with `tokio::time::sleep` for up to `timeout`.
    pub async fn recv_async(&mut self, timeout: Duration) -> Result<RecvStatus<Message>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.recv()? {
                RecvStatus::Empty => {}
                status => return Ok(status),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(RecvStatus::TimedOut);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Chunked receive, polling for the first frame with `tokio::time::sleep`.
    /// Continuation frames are collected without yielding.
    pub async fn recv_nolimit_async(&mut self, timeout: Duration) -> Result<RecvStatus<Message>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.recv_nolimit()? {
                RecvStatus::Empty => {}
                status => return Ok(status),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(RecvStatus::TimedOut);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("inner", &self.inner)
            .field("type", &self.serializer.codec().type_name())
            .field("eof_received", &self.eof_received)
            .finish()
    }
}
