//! Message queues for inter-component communication.
//!
//! `Queue` carries work that exactly one consumer must handle (jobs waiting for
//! dispatch, status updates, in-process transport links). `BroadcastQueue`
//! fans resource events out to every watcher.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{EdgeTaskError, Result};

/// Bounded MPMC queue backed by flume.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: Arc<flume::Receiver<T>>,
    sender: Arc<flume::Sender<T>>,
}

#[allow(unused)]
impl<T> Queue<T> {
    /// create a new queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, rx) = flume::bounded(cap.max(1));

        Arc::new(Self {
            receiver: Arc::new(rx),
            sender: Arc::new(tx),
        })
    }

    /// send a message, blocking the thread while the queue is full
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send(msg).map_err(|e| EdgeTaskError::Queue(e.to_string()))
    }

    /// send a message without waiting, failing when the queue is full
    pub fn try_send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.try_send(msg).map_err(|e| EdgeTaskError::Queue(e.to_string()))
    }

    /// send a message, yielding while the queue is full
    pub async fn send_async(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send_async(msg).await.map_err(|e| EdgeTaskError::Queue(e.to_string()))
    }

    /// receive a message asynchronously, `None` once every sender is gone
    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }

    /// receive a message if one is ready
    pub fn try_next(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// number of queued messages
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Broadcast queue for one-to-many distribution, backed by tokio's broadcast channel.
///
/// Sending with no live subscriber is not an error: resource events are
/// dropped when nobody watches, the same as an informer without handlers.
#[derive(Clone)]
pub struct BroadcastQueue<T> {
    sender: Arc<broadcast::Sender<T>>,
}

impl<T: Clone> BroadcastQueue<T> {
    /// create a new broadcast queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(cap.max(1));

        Arc::new(Self {
            sender: Arc::new(tx),
        })
    }

    /// publish a message, returns the number of subscribers that will see it
    pub fn send(
        &self,
        msg: T,
    ) -> usize {
        self.sender.send(msg).unwrap_or(0)
    }

    /// subscribe to the queue
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}
