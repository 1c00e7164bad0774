//! Multi-producer, single-consumer command queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cadlink_protocol::Payload;

use super::error::HandoffError;
use super::listener::PayloadSink;

/// FIFO of payloads awaiting the dispatcher.
///
/// Clones share the same buffer. Producers call [`enqueue`](Self::enqueue) from
/// any thread; only the dispatcher calls [`drain_all`](Self::drain_all).
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<Payload>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload. Never blocks beyond the critical section and never fails.
    pub fn enqueue(&self, payload: Payload) {
        self.lock().push_back(payload);
    }

    /// Take every queued payload in arrival order, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<Payload> {
        let drained = std::mem::take(&mut *self.lock());
        drained.into()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A producer panicking mid-push leaves the deque intact, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Payload>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PayloadSink for CommandQueue {
    fn submit(&self, payload: Payload) -> Result<(), HandoffError> {
        self.enqueue(payload);
        Ok(())
    }
}
