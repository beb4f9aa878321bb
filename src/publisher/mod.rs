//! Publisher module for the output queue
//!
//! Streams push one batch per change message; any number of consumer threads
//! drain the queue with blocking receives.

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{trace, warn};

use crate::cache::Resource;

/// One batch of updated entities
pub type Batch = Vec<Resource>;

/// Producer side of the output queue
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: Sender<Batch>,
}

impl Publisher {
    pub fn new(sender: Sender<Batch>) -> Self {
        Self { sender }
    }

    /// Push a batch; a queue with no consumers left drops it
    pub fn publish(&self, batch: Batch) {
        let len = batch.len();
        match self.sender.send(batch) {
            Ok(()) => trace!(entities = len, "Published batch"),
            Err(_) => warn!(entities = len, "Output queue has no consumers, batch dropped"),
        }
    }

    pub fn queued(&self) -> usize {
        self.sender.len()
    }
}

/// Constructors for the publisher/receiver pair
pub struct OutputQueue;

impl OutputQueue {
    pub fn unbounded() -> (Publisher, Receiver<Batch>) {
        let (sender, receiver) = channel::unbounded();
        (Publisher::new(sender), receiver)
    }

    /// Publishing waits while the queue is full; `dispatch` publishes with the
    /// listener lock released
    pub fn bounded(capacity: usize) -> (Publisher, Receiver<Batch>) {
        let (sender, receiver) = channel::bounded(capacity);
        (Publisher::new(sender), receiver)
    }
}
