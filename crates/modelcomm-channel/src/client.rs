use std::sync::Arc;
use std::time::Duration;

use modelcomm_schema::{Message, SerializeOptions, Serializer, TypeRegistry};
use modelcomm_transport::{Direction, TransportKind, GENERATE_ADDRESS};
use serde_json::Value;
use tracing::{debug, info};

use crate::comm::Comm;
use crate::config::CommConfig;
use crate::control::{ControlMessage, CLIENT_ID_KEY};
use crate::error::{CommError, Result};
use crate::status::RecvStatus;

/// Client side of a request/response channel.
///
/// Owns its reply queue and signs on to the server at construction.
pub struct ClientComm {
    id: String,
    config: CommConfig,
    requests: Comm,
    replies: Comm,
    closed: bool,
}

impl ClientComm {
    /// Connect to the server at `server_address` and sign on.
    pub fn new(
        kind: &TransportKind,
        registry: Arc<TypeRegistry>,
        server_address: &str,
        config: CommConfig,
    ) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();

        let request_config = config
            .clone()
            .with_name(format!("{}-request", config.name))
            .with_address(server_address)
            .with_direction(Direction::Send);
        let requests = Comm::new(kind, Arc::clone(&registry), request_config)?;

        let reply_config = config
            .clone()
            .with_name(format!("{}-reply", config.name))
            .with_address(GENERATE_ADDRESS)
            .with_direction(Direction::Recv);
        let serializer = Serializer::new(registry, config.reply_typedef().clone())?;
        let replies = Comm::with_serializer(kind, serializer, reply_config)?;

        let mut client = Self {
            id,
            config,
            requests,
            replies,
            closed: false,
        };
        client.signon()?;
        Ok(client)
    }

    fn signon(&mut self) -> Result<()> {
        let signon = ControlMessage::signon(&self.id, self.replies.address());
        if !self.requests.send_metadata(&signon.to_metadata()?)? {
            return Err(CommError::Closed(self.requests.name().to_string()));
        }
        info!(
            name = %self.config.name,
            client = %self.id,
            server = %self.requests.address(),
            reply = %self.replies.address(),
            "signed on"
        );
        Ok(())
    }

    /// Unique id the server routes replies by.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server_address(&self) -> &str {
        self.requests.address()
    }

    /// Address of the reply queue this client owns.
    pub fn reply_address(&self) -> &str {
        self.replies.address()
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.requests.is_closed()
    }

    fn request_options(&self) -> SerializeOptions {
        SerializeOptions::new().with_extra(CLIENT_ID_KEY, Value::String(self.id.clone()))
    }

    /// Send a request without waiting for the reply.
    pub fn rpc_send(&mut self, message: &Message) -> Result<bool> {
        let options = self.request_options();
        self.requests.send_nolimit_with(message, &options)
    }

    /// Take a reply routed to this client, without waiting.
    pub fn rpc_recv(&mut self) -> Result<RecvStatus<Message>> {
        self.replies.recv_nolimit()
    }

    /// Take a reply, waiting up to `timeout`.
    pub fn rpc_recv_timeout(&mut self, timeout: Duration) -> Result<RecvStatus<Message>> {
        self.replies.recv_nolimit_timeout(timeout)
    }

    /// Send a request and wait for exactly one reply. `None` uses the
    /// configured reply timeout.
    pub fn rpc_call(
        &mut self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<RecvStatus<Message>> {
        if !self.rpc_send(message)? {
            debug!(client = %self.id, "request not sent");
            return Ok(RecvStatus::Closed);
        }
        let timeout = timeout.unwrap_or(self.config.reply_timeout);
        self.rpc_recv_timeout(timeout)
    }

    /// Same as [`rpc_call`](Self::rpc_call); requests and replies of any
    /// size are always chunked.
    pub fn rpc_call_nolimit(
        &mut self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<RecvStatus<Message>> {
        self.rpc_call(message, timeout)
    }

    /// Signal end of stream to the server.
    pub fn send_eof(&mut self) -> Result<bool> {
        let options = self.request_options();
        self.requests.send_nolimit_with(&Message::Eof, &options)
    }

    /// Close both queues, optionally telling the server to forget this
    /// client first. The reply queue is destroyed; the server's request
    /// queue is left alone.
    pub fn close(&mut self, notify_server: bool) {
        if self.closed {
            return;
        }
        self.closed = true;
        if notify_server && self.requests.is_open() {
            let sent = ControlMessage::signoff(&self.id)
                .to_metadata()
                .and_then(|metadata| self.requests.send_metadata(&metadata));
            match sent {
                Ok(true) => info!(client = %self.id, "signed off"),
                Ok(false) => debug!(client = %self.id, "server gone before signoff"),
                Err(err) => debug!(client = %self.id, error = %err, "signoff failed"),
            }
        }
        self.replies.close();
        self.requests.close();
    }
}

impl Drop for ClientComm {
    fn drop(&mut self) {
        self.close(false);
    }
}

impl std::fmt::Debug for ClientComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientComm")
            .field("id", &self.id)
            .field("server", &self.server_address())
            .field("reply", &self.reply_address())
            .field("closed", &self.closed)
            .finish()
    }
}
