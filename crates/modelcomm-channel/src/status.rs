/// Outcome of a receive attempt.
///
/// Callers distinguish "no message yet" ([`Empty`](Self::Empty)) from a
/// closed channel and from an elapsed deadline without handling errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RecvStatus<T> {
    /// A message arrived.
    Received(T),
    /// Nothing is pending right now.
    Empty,
    /// The peer sent the end-of-stream sentinel.
    Eof,
    /// The channel or its backend resource is closed.
    Closed,
    /// A timed wait elapsed.
    TimedOut,
}

impl<T> RecvStatus<T> {
    /// The success flag: true only when a message arrived.
    pub fn is_success(&self) -> bool {
        matches!(self, RecvStatus::Received(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RecvStatus::Empty)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, RecvStatus::Eof)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, RecvStatus::Closed)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, RecvStatus::TimedOut)
    }

    /// The received message, if any.
    pub fn into_received(self) -> Option<T> {
        match self {
            RecvStatus::Received(message) => Some(message),
            _ => None,
        }
    }

    /// Flatten into `(flag, payload)`.
    pub fn into_flagged(self) -> (bool, Option<T>) {
        match self {
            RecvStatus::Received(message) => (true, Some(message)),
            _ => (false, None),
        }
    }

    /// Split off the received message, re-typing every other outcome.
    pub(crate) fn take_received<U>(self) -> Result<T, RecvStatus<U>> {
        match self {
            RecvStatus::Received(message) => Ok(message),
            RecvStatus::Empty => Err(RecvStatus::Empty),
            RecvStatus::Eof => Err(RecvStatus::Eof),
            RecvStatus::Closed => Err(RecvStatus::Closed),
            RecvStatus::TimedOut => Err(RecvStatus::TimedOut),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RecvStatus<U> {
        match self {
            RecvStatus::Received(message) => RecvStatus::Received(f(message)),
            RecvStatus::Empty => RecvStatus::Empty,
            RecvStatus::Eof => RecvStatus::Eof,
            RecvStatus::Closed => RecvStatus::Closed,
            RecvStatus::TimedOut => RecvStatus::TimedOut,
        }
    }
}
