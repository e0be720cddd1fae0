use std::time::Duration;

use modelcomm_transport::{Direction, GENERATE_ADDRESS};
use serde_json::{json, Value};

/// Bounded retry cycle applied when a backend queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub attempts: u32,
    /// Delay before the first retry; later retries wait proportionally longer.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryConfig {
    /// Fail on the first full-queue condition.
    pub fn none() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::ZERO,
        }
    }
}

/// Configuration for one channel endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CommConfig {
    /// Channel name used in logs and worker thread names.
    pub name: String,
    /// Backend address, or [`GENERATE_ADDRESS`] to allocate a new resource.
    pub address: String,
    /// Which way messages flow through this endpoint.
    pub direction: Direction,
    /// Typedef of the values carried by the channel.
    pub typedef: Value,
    /// Typedef of RPC replies. Defaults to `typedef`.
    pub response_typedef: Option<Value>,
    /// Full-queue retry policy.
    pub retry: RetryConfig,
    /// Interval at which the worker polls the backend and waits re-check state.
    pub poll_interval: Duration,
    /// Deadline for blocking receives that take no explicit timeout.
    pub default_timeout: Duration,
    /// Deadline for an RPC call to be answered.
    pub reply_timeout: Duration,
    /// Deadline for the rest of a chunked message once its first frame
    /// has arrived. `None` waits until the message completes or the
    /// channel closes.
    pub chunk_timeout: Option<Duration>,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            name: "comm".to_string(),
            address: GENERATE_ADDRESS.to_string(),
            direction: Direction::Send,
            typedef: json!({ "type": "bytes" }),
            response_typedef: None,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_millis(10),
            default_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
            chunk_timeout: None,
        }
    }
}

impl CommConfig {
    /// Default configuration for a named channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_typedef(mut self, typedef: Value) -> Self {
        self.typedef = typedef;
        self
    }

    pub fn with_response_typedef(mut self, typedef: Value) -> Self {
        self.response_typedef = Some(typedef);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    /// Typedef for RPC replies.
    pub fn reply_typedef(&self) -> &Value {
        self.response_typedef.as_ref().unwrap_or(&self.typedef)
    }
}
