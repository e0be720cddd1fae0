use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{parse_key, DirectTransport, DEFAULT_MAX_MSG_SIZE, GENERATE_ADDRESS};

/// Sizing for in-process queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Total bytes a queue may hold before senders get `TryAgain`.
    /// Default: 16 KiB, the System V `msgmnb` default.
    pub capacity_bytes: usize,
    /// Per-frame ceiling reported by endpoints. Default: 2048.
    pub max_msg_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 16 * 1024,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }
}

struct QueueState {
    frames: VecDeque<Bytes>,
    used_bytes: usize,
}

pub(crate) struct SharedQueue {
    key: i64,
    capacity_bytes: usize,
    state: Mutex<QueueState>,
    removed: AtomicBool,
}

impl SharedQueue {
    fn new(key: i64, capacity_bytes: usize) -> Self {
        Self {
            key,
            capacity_bytes,
            state: Mutex::new(QueueState {
                frames: VecDeque::new(),
                used_bytes: 0,
            }),
            removed: AtomicBool::new(false),
        }
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    fn push(&self, frame: Bytes) -> Result<()> {
        if self.is_removed() {
            return Err(TransportError::ResourceGone {
                address: self.key.to_string(),
            });
        }
        let mut state = lock(&self.state);
        if state.used_bytes + frame.len() > self.capacity_bytes && !state.frames.is_empty() {
            return Err(TransportError::TryAgain {
                address: self.key.to_string(),
            });
        }
        state.used_bytes += frame.len();
        state.frames.push_back(frame);
        Ok(())
    }

    fn pop(&self) -> Option<Bytes> {
        let mut state = lock(&self.state);
        let frame = state.frames.pop_front()?;
        state.used_bytes -= frame.len();
        Some(frame)
    }

    fn len(&self) -> usize {
        lock(&self.state).frames.len()
    }

    fn drain(&self) -> usize {
        let mut state = lock(&self.state);
        let count = state.frames.len();
        state.frames.clear();
        state.used_bytes = 0;
        count
    }

    fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        self.drain();
    }
}

struct RegistryInner {
    queues: Mutex<HashMap<i64, Arc<SharedQueue>>>,
    next_key: AtomicI64,
    config: QueueConfig,
}

/// Process-scoped table of in-process message queues.
///
/// Create one at process start and hand clones to every endpoint that
/// should see the same queues. [`cleanup`](Self::cleanup) tears the whole
/// table down; endpoints still holding a removed queue observe it as closed.
#[derive(Clone)]
pub struct QueueRegistry {
    inner: Arc<RegistryInner>,
}

impl QueueRegistry {
    /// Create an empty registry with default queue sizing.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create an empty registry with explicit queue sizing.
    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                queues: Mutex::new(HashMap::new()),
                next_key: AtomicI64::new(1),
                config,
            }),
        }
    }

    /// Allocate a new queue and return its key.
    pub fn create_queue(&self) -> i64 {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SharedQueue::new(key, self.inner.config.capacity_bytes));
        lock(&self.inner.queues).insert(key, queue);
        debug!(key, "created in-process queue");
        key
    }

    /// Remove a registered queue.
    ///
    /// Returns [`TransportError::NotRegistered`] when the key is unknown:
    /// asking to remove something this process never allocated is a logic
    /// error, not a normal close.
    pub fn remove_queue(&self, key: i64) -> Result<()> {
        let queue = lock(&self.inner.queues).remove(&key);
        match queue {
            Some(queue) => {
                queue.mark_removed();
                debug!(key, "removed in-process queue");
                Ok(())
            }
            None => Err(TransportError::NotRegistered {
                address: key.to_string(),
            }),
        }
    }

    /// Remove every registered queue. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let drained: Vec<Arc<SharedQueue>> =
            lock(&self.inner.queues).drain().map(|(_, q)| q).collect();
        for queue in &drained {
            queue.mark_removed();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "cleaned up in-process queues");
        }
        drained.len()
    }

    /// True if the key refers to a live queue.
    pub fn contains(&self, key: i64) -> bool {
        lock(&self.inner.queues).contains_key(&key)
    }

    /// Number of live queues.
    pub fn comm_count(&self) -> usize {
        lock(&self.inner.queues).len()
    }

    /// Keys of live queues, sorted.
    pub fn keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = lock(&self.inner.queues).keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Frames waiting in a queue, or `None` if the key is unknown.
    pub fn pending(&self, key: i64) -> Option<usize> {
        self.lookup(key).map(|q| q.len())
    }

    /// Queue sizing in use.
    pub fn config(&self) -> QueueConfig {
        self.inner.config
    }

    fn lookup(&self, key: i64) -> Option<Arc<SharedQueue>> {
        lock(&self.inner.queues).get(&key).cloned()
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.keys())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// One endpoint of an in-process queue.
pub struct MemoryQueue {
    registry: QueueRegistry,
    address: String,
    queue: Option<Arc<SharedQueue>>,
    bound: bool,
    owner: bool,
}

impl MemoryQueue {
    /// Endpoint for `address`, or a new queue for [`GENERATE_ADDRESS`].
    pub fn new(registry: QueueRegistry, address: impl Into<String>) -> Self {
        Self {
            registry,
            address: address.into(),
            queue: None,
            bound: false,
            owner: false,
        }
    }

    /// Endpoint that allocates (and owns) a new queue when bound.
    pub fn generate(registry: QueueRegistry) -> Self {
        Self::new(registry, GENERATE_ADDRESS)
    }

    fn gone(&self) -> TransportError {
        TransportError::ResourceGone {
            address: self.address.clone(),
        }
    }
}

impl DirectTransport for MemoryQueue {
    fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Ok(());
        }
        if self.address == GENERATE_ADDRESS {
            let key = self.registry.create_queue();
            self.address = key.to_string();
            self.owner = true;
        } else {
            parse_key(&self.address)?;
        }
        self.bound = true;
        Ok(())
    }

    fn open_direct(&mut self) -> Result<()> {
        if self.is_open_direct() {
            return Ok(());
        }
        self.bind()?;
        let key = parse_key(&self.address)?;
        let queue = self.registry.lookup(key).ok_or_else(|| self.gone())?;
        self.queue = Some(queue);
        debug!(address = %self.address, owner = self.owner, "opened in-process queue");
        Ok(())
    }

    fn close_direct(&mut self) -> Result<()> {
        self.queue = None;
        if self.owner {
            let key = parse_key(&self.address)?;
            match self.registry.remove_queue(key) {
                Ok(()) | Err(TransportError::NotRegistered { .. }) => {}
                Err(err) => return Err(err),
            }
            self.owner = false;
        }
        self.bound = false;
        Ok(())
    }

    fn is_open_direct(&mut self) -> bool {
        match &self.queue {
            Some(queue) if queue.is_removed() => {
                debug!(address = %self.address, "queue removed by owner");
                self.queue = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn send_direct(&mut self, payload: &[u8]) -> Result<bool> {
        let max = self.max_msg_size();
        if payload.len() > max {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max,
            });
        }
        if !self.is_open_direct() {
            return Ok(false);
        }
        let Some(queue) = &self.queue else {
            return Ok(false);
        };
        match queue.push(Bytes::copy_from_slice(payload)) {
            Ok(()) => {
                debug!(address = %self.address, bytes = payload.len(), "sent frame");
                Ok(true)
            }
            Err(err) => {
                if err.is_gone() {
                    self.queue = None;
                }
                Err(err)
            }
        }
    }

    fn recv_direct(&mut self) -> Result<Option<Bytes>> {
        match &self.queue {
            None => Err(TransportError::NotOpen(self.address.clone())),
            Some(queue) if queue.is_removed() => {
                self.queue = None;
                Err(self.gone())
            }
            Some(queue) => {
                let frame = queue.pop();
                if let Some(frame) = &frame {
                    debug!(address = %self.address, bytes = frame.len(), "received frame");
                }
                Ok(frame)
            }
        }
    }

    fn n_msg_direct_send(&mut self) -> usize {
        if !self.is_open_direct() {
            return 0;
        }
        self.queue.as_ref().map_or(0, |q| q.len())
    }

    fn purge(&mut self) -> Result<usize> {
        if !self.is_open_direct() {
            return Ok(0);
        }
        Ok(self.queue.as_ref().map_or(0, |q| q.drain()))
    }

    fn address(&self) -> Option<&str> {
        if self.bound || self.address != GENERATE_ADDRESS {
            Some(&self.address)
        } else {
            None
        }
    }

    fn is_owner(&self) -> bool {
        self.owner
    }

    fn max_msg_size(&self) -> usize {
        self.registry.config().max_msg_size
    }

    fn transport_name(&self) -> &'static str {
        "memory-queue"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
