use crate::error::Result;
use crate::memory::{MemoryQueue, QueueRegistry};
use crate::traits::DirectTransport;

/// Selects the backend that endpoints are created on.
#[derive(Debug, Clone)]
pub enum TransportKind {
    /// In-process queues shared through a [`QueueRegistry`].
    Memory(QueueRegistry),
    /// System V message queues (Linux only).
    Sysv,
}

impl TransportKind {
    /// In-process backend with a fresh registry.
    pub fn memory() -> Self {
        TransportKind::Memory(QueueRegistry::new())
    }

    /// Create an unopened endpoint for `address` (or the generate sentinel).
    pub fn endpoint(&self, address: &str) -> Result<Box<dyn DirectTransport>> {
        match self {
            TransportKind::Memory(registry) => {
                Ok(Box::new(MemoryQueue::new(registry.clone(), address)))
            }
            #[cfg(target_os = "linux")]
            TransportKind::Sysv => Ok(Box::new(crate::sysv::SysvQueue::new(address))),
            #[cfg(not(target_os = "linux"))]
            TransportKind::Sysv => Err(crate::error::TransportError::Unsupported("sysv-queue")),
        }
    }

    /// Backend name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Memory(_) => "memory-queue",
            TransportKind::Sysv => "sysv-queue",
        }
    }
}
