use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use modelcomm_schema::{Message, Serializer, TypeRegistry};
use modelcomm_transport::{Direction, TransportKind};
use tracing::{debug, info, warn};

use crate::comm::Comm;
use crate::config::CommConfig;
use crate::control::{ControlKind, ControlMessage, CLIENT_ID_KEY};
use crate::error::Result;
use crate::status::RecvStatus;

/// Server side of a request/response channel.
///
/// Owns the request queue every client sends to. Clients sign on with
/// their reply address; each received request remembers its origin so the
/// matching [`rpc_send`](Self::rpc_send) goes back to the right client.
pub struct ServerComm {
    kind: TransportKind,
    registry: Arc<TypeRegistry>,
    config: CommConfig,
    requests: Comm,
    clients: BTreeMap<String, Comm>,
    origins: VecDeque<String>,
    signed_off: usize,
    eof_received: bool,
}

impl ServerComm {
    /// Open the request queue at `config.address` (usually generated).
    pub fn new(
        kind: TransportKind,
        registry: Arc<TypeRegistry>,
        config: CommConfig,
    ) -> Result<Self> {
        let request_config = config.clone().with_direction(Direction::Recv);
        let requests = Comm::new(&kind, Arc::clone(&registry), request_config)?;
        info!(name = %config.name, address = %requests.address(), "rpc server listening");
        Ok(Self {
            kind,
            registry,
            config,
            requests,
            clients: BTreeMap::new(),
            origins: VecDeque::new(),
            signed_off: 0,
            eof_received: false,
        })
    }

    /// Address clients connect to.
    pub fn address(&self) -> &str {
        self.requests.address()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Ids of signed-on clients, sorted.
    pub fn clients(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Requests received but not yet answered.
    pub fn pending_replies(&self) -> usize {
        self.origins.len()
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Next request from any signed-on client, without waiting.
    pub fn rpc_recv(&mut self) -> Result<RecvStatus<Message>> {
        self.recv_request(None)
    }

    /// Next request, waiting up to `timeout`.
    pub fn rpc_recv_timeout(&mut self, timeout: Duration) -> Result<RecvStatus<Message>> {
        self.recv_request(Some(timeout))
    }

    /// True once every client has finished with an end-of-stream message.
    /// Later receives report [`RecvStatus::Closed`].
    pub fn eof_received(&self) -> bool {
        self.eof_received
    }

    fn recv_request(&mut self, timeout: Option<Duration>) -> Result<RecvStatus<Message>> {
        if self.eof_received {
            return Ok(RecvStatus::Closed);
        }
        loop {
            let envelope = match self.requests.recv_envelope(timeout)?.take_received() {
                Ok(envelope) => envelope,
                Err(status) => return Ok(status),
            };

            if let Some(control) = ControlMessage::from_metadata(&envelope.metadata) {
                self.handle_control(control)?;
                continue;
            }

            let client_id = envelope
                .metadata
                .get(CLIENT_ID_KEY)
                .and_then(|id| id.as_str())
                .map(str::to_string);
            let (message, _) = self.requests.serializer().deserialize_envelope(envelope)?;

            if message.is_eof() {
                if let Some(id) = client_id {
                    self.forget(&id);
                }
                if self.clients.is_empty() {
                    info!(name = %self.config.name, "all clients finished");
                    self.eof_received = true;
                    return Ok(RecvStatus::Eof);
                }
                continue;
            }

            match client_id {
                Some(id) => {
                    if !self.clients.contains_key(&id) {
                        warn!(
                            name = %self.config.name,
                            client = %id,
                            "request from unknown client"
                        );
                    }
                    self.origins.push_back(id);
                }
                None => warn!(name = %self.config.name, "request without client id"),
            }
            return Ok(RecvStatus::Received(message));
        }
    }

    fn handle_control(&mut self, control: ControlMessage) -> Result<()> {
        match control.kind {
            ControlKind::Signon => {
                let Some(address) = control.response_address else {
                    warn!(client = %control.client_id, "signon without reply address");
                    return Ok(());
                };
                let reply_config = self
                    .config
                    .clone()
                    .with_name(format!("{}-reply-{}", self.config.name, control.client_id))
                    .with_address(address.clone())
                    .with_direction(Direction::Send);
                let serializer = Serializer::new(
                    Arc::clone(&self.registry),
                    self.config.reply_typedef().clone(),
                )?;
                let reply = match Comm::with_serializer(&self.kind, serializer, reply_config) {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!(
                            client = %control.client_id,
                            reply = %address,
                            error = %err,
                            "reply queue unreachable"
                        );
                        return Ok(());
                    }
                };
                info!(
                    name = %self.config.name,
                    client = %control.client_id,
                    reply = %address,
                    "client signed on"
                );
                self.clients.insert(control.client_id, reply);
            }
            ControlKind::Signoff => {
                self.forget(&control.client_id);
            }
        }
        Ok(())
    }

    fn forget(&mut self, client_id: &str) {
        if let Some(mut reply) = self.clients.remove(client_id) {
            reply.close();
            self.signed_off += 1;
            info!(name = %self.config.name, client = %client_id, "client signed off");
        }
    }

    /// Reply to the oldest unanswered request. False when no request is
    /// outstanding or the client's reply queue is gone.
    pub fn rpc_send(&mut self, message: &Message) -> Result<bool> {
        let Some(client_id) = self.origins.pop_front() else {
            debug!(name = %self.config.name, "reply without outstanding request");
            return Ok(false);
        };
        let Some(reply) = self.clients.get_mut(&client_id) else {
            warn!(
                name = %self.config.name,
                client = %client_id,
                "reply to departed client dropped"
            );
            return Ok(false);
        };
        reply.send_nolimit(message)
    }

    /// Clients that have signed off since the server started.
    pub fn signed_off(&self) -> usize {
        self.signed_off
    }

    /// Drop every reply handle and destroy the request queue.
    pub fn close(&mut self) {
        for (_, mut reply) in std::mem::take(&mut self.clients) {
            reply.close();
        }
        self.origins.clear();
        self.requests.close();
    }
}

impl Drop for ServerComm {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ServerComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerComm")
            .field("name", &self.config.name)
            .field("address", &self.address())
            .field("clients", &self.clients())
            .field("pending_replies", &self.origins.len())
            .finish()
    }
}
