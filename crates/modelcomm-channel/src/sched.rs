use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CommError, Result};

type Outcome<T> = (bool, Option<T>);

/// Runs one callable on a background thread after a delay and keeps its
/// `(flag, result)` until collected.
///
/// At most one result may be outstanding at a time.
#[derive(Debug)]
pub struct Scheduled<T> {
    owner: String,
    slot: Arc<Mutex<Option<Outcome<T>>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Scheduled<T> {
    /// Scheduler labelled with its owning channel's name.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            slot: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// True while a scheduled result has not been collected.
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Run `task` after `delay`.
    pub fn schedule<F>(&mut self, delay: Duration, task: F) -> Result<()>
    where
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        if self.is_pending() {
            return Err(CommError::TaskPending(self.owner.clone()));
        }
        let slot = Arc::clone(&self.slot);
        let handle = thread::Builder::new()
            .name(format!("modelcomm-{}-sched", self.owner))
            .spawn(move || {
                thread::sleep(delay);
                let outcome = task();
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
            })
            .map_err(modelcomm_transport::TransportError::from)?;
        debug!(owner = %self.owner, ?delay, "task scheduled");
        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the scheduled task and take its result. `None` when nothing
    /// was scheduled; `(false, None)` when the task panicked.
    pub fn take(&mut self) -> Option<Outcome<T>> {
        let handle = self.handle.take()?;
        if handle.join().is_err() {
            warn!(owner = %self.owner, "scheduled task panicked");
            return Some((false, None));
        }
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .or(Some((false, None)))
    }
}
