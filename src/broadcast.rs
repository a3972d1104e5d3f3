//! Fan-out publisher with a frozen subscriber list.
//!
//! Subscribing and publishing are split into two phases so the
//! "subscribe before publish" rule holds by construction:
//!
//! ```
//! use conflux::{BroadcastBuilder, Stream};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> conflux::Result<()> {
//! let mut builder = BroadcastBuilder::<u32>::new();
//! let mut sub = builder.subscribe();
//! let mut publisher = builder.start();
//!
//! let cancel = CancellationToken::new();
//! let reader = tokio::spawn(async move { sub.next(&CancellationToken::new()).await });
//! publisher.emit(5, &cancel).await?;
//! assert_eq!(reader.await.unwrap()?, 5);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::handoff::{self, Delivery};
use crate::stream::Stream;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Setup phase of a [`Broadcast`]: hands out subscriptions.
pub struct BroadcastBuilder<T> {
    label: String,
    subscribers: Vec<handoff::Sender<T>>,
}

/// Publishing phase: delivers every value to every subscriber.
pub struct Broadcast<T> {
    label: String,
    subscribers: Vec<handoff::Sender<T>>,
}

/// A single consumer's view of a [`Broadcast`].
pub struct Subscription<T> {
    queue: handoff::Receiver<T>,
}

impl<T> Default for BroadcastBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BroadcastBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::labelled("broadcast")
    }

    /// Create a builder whose log lines carry `label`.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber. Delivery order follows subscription order.
    pub fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = handoff::channel();
        self.subscribers.push(tx);
        Subscription { queue: rx }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Freeze the subscriber list and start publishing.
    #[must_use]
    pub fn start(self) -> Broadcast<T> {
        Broadcast {
            label: self.label,
            subscribers: self.subscribers,
        }
    }
}

impl<T: Clone> Broadcast<T> {
    /// Deliver `value` to each subscriber in turn.
    ///
    /// Each hand-off blocks until that subscriber takes the value. If `cancel`
    /// fires part way through, the remaining subscribers miss this value and
    /// [`Error::Interrupted`](crate::Error::Interrupted) is returned.
    pub async fn emit(&mut self, value: T, cancel: &CancellationToken) -> Result<()> {
        debug!(broadcast = %self.label, subscribers = self.subscribers.len(), "broadcasting");
        for (idx, sub) in self.subscribers.iter_mut().enumerate() {
            if sub.send(value.clone(), cancel).await? == Delivery::Disconnected {
                debug!(broadcast = %self.label, subscriber = idx, "subscriber dropped");
            }
        }
        Ok(())
    }
}

impl<T> Broadcast<T> {
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// End every subscription; pending and future `next` calls return
    /// [`Error::EndOfStream`](crate::Error::EndOfStream).
    pub fn close(self) {
        debug!(broadcast = %self.label, "closing broadcast");
    }
}

#[async_trait]
impl<T: Send + 'static> Stream<T> for Subscription<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<T> {
        self.queue.recv(cancel).await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
