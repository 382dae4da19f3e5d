//! Fan-out of processed flags to live viewers (the web dashboard).
//!
//! Each subscriber has its own bounded buffer. Publishing never waits: a
//! subscriber whose buffer is full, or who went away, is dropped from the
//! set and has to subscribe again.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::types::Flag;

/// Flags handled in one submit cycle, with their final status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleEvent {
    pub cycle: i64,
    pub flags: Vec<Flag>,
}

#[derive(Debug)]
pub struct Announcer {
    capacity: usize,
    subscribers: Mutex<Vec<flume::Sender<Arc<CycleEvent>>>>,
}

/// Receiving end, detaches when dropped
#[derive(Debug)]
pub struct Subscription {
    rx: flume::Receiver<Arc<CycleEvent>>,
}

impl Announcer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = flume::bounded(self.capacity);
        self.subscribers.lock().push(tx);
        Subscription { rx }
    }

    pub fn publish(&self, event: CycleEvent) {
        let event = Arc::new(event);
        let mut lock = self.subscribers.lock();

        let before = lock.len();
        lock.retain(|tx| tx.try_send(event.clone()).is_ok());

        if lock.len() < before {
            debug!(
                "Dropped {} slow or detached subscribers, {} left",
                before - lock.len(),
                lock.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Subscription {
    /// Waits for the next event. `None` once the announcer dropped us.
    pub async fn recv_async(&self) -> Option<Arc<CycleEvent>> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<Arc<CycleEvent>> {
        self.rx.try_recv().ok()
    }

    /// Events as a stream, ends when the announcer drops us
    pub fn into_stream(self) -> flume::r#async::RecvStream<'static, Arc<CycleEvent>> {
        self.rx.into_stream()
    }
}
