//! Fan-out of change notifications to any number of subscribers.
//!
//! Every subscriber gets its own unbounded channel, so publishing never
//! blocks the writer. Subscribers whose receiver was dropped are pruned on
//! the next publish.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

pub struct Publisher<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, value: &T) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let before = senders.len();
        senders.retain(|tx| tx.send(value.clone()).is_ok());
        if senders.len() < before {
            debug!(dropped = before - senders.len(), "Pruned closed subscribers");
        }
    }
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}
