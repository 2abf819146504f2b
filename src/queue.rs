use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::error::QueueError;
use crate::message::Delivery;

/// Create a bounded FIFO work queue.
///
/// The sender half can be cloned and handed to any number of producers; the
/// receiver is owned by the single worker loop.
pub fn work_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Delivery>,
}

impl QueueSender {
    /// Append to the tail, waiting while the queue is full.
    pub async fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError> {
        self.tx.send(delivery).await.map_err(|_| QueueError::Closed)
    }

    /// Append without waiting.
    pub fn try_enqueue(&self, delivery: Delivery) -> Result<(), QueueError> {
        self.tx.try_send(delivery).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Free slots left.
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Delivery>,
}

impl QueueReceiver {
    /// Remove the head item, waiting until one arrives. `None` once every
    /// sender is gone and the queue is drained.
    pub async fn dequeue(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// `None` when nothing is queued right now.
    pub fn try_dequeue(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(delivery) => Some(delivery),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting new items; already queued items can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
