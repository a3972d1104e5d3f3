//! Unbuffered, cancellable hand-off between one producer and one consumer.
//!
//! tokio has no rendezvous channel, so the consumer drives the exchange: every
//! `recv` posts a one-shot slot on a request queue and the producer fills the
//! oldest live slot. A `send` therefore completes only once the consumer has
//! asked for the value, and a cancelled `send` never leaves the value queued
//! behind.

use crate::error::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Outcome of a successful [`Sender::send`] wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The consumer took the value.
    Delivered,
    /// The consumer is gone; the value was dropped.
    Disconnected,
}

pub(crate) struct Sender<T> {
    requests: mpsc::UnboundedReceiver<oneshot::Sender<T>>,
}

pub(crate) struct Receiver<T> {
    requests: mpsc::UnboundedSender<oneshot::Sender<T>>,
    // A request survives a cancelled `recv` so it is never posted twice.
    pending: Option<oneshot::Receiver<T>>,
}

pub(crate) fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Sender { requests: rx },
        Receiver {
            requests: tx,
            pending: None,
        },
    )
}

impl<T> Sender<T> {
    /// Block until the consumer takes `value` or `cancel` fires.
    pub(crate) async fn send(&mut self, value: T, cancel: &CancellationToken) -> Result<Delivery> {
        let mut value = value;
        loop {
            let slot = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Interrupted),
                slot = self.requests.recv() => slot,
            };
            let Some(slot) = slot else {
                return Ok(Delivery::Disconnected);
            };
            match slot.send(value) {
                Ok(()) => return Ok(Delivery::Delivered),
                // the consumer abandoned this request; wait for a fresh one
                Err(returned) => value = returned,
            }
        }
    }
}

impl<T> Receiver<T> {
    /// Block until the producer hands over a value, the producer is dropped
    /// (`EndOfStream`), or `cancel` fires (`Interrupted`).
    pub(crate) async fn recv(&mut self, cancel: &CancellationToken) -> Result<T> {
        if self.pending.is_none() {
            let (slot, pending) = oneshot::channel();
            if self.requests.send(slot).is_err() {
                return Err(Error::EndOfStream);
            }
            self.pending = Some(pending);
        }

        let Some(pending) = self.pending.as_mut() else {
            return Err(Error::EndOfStream);
        };
        let received = tokio::select! {
            biased;
            received = pending => received,
            () = cancel.cancelled() => return Err(Error::Interrupted),
        };
        self.pending = None;
        received.map_err(|_| Error::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn send_waits_for_receiver() {
        let (mut tx, mut rx) = channel::<u32>();
        let cancel = CancellationToken::new();

        let sender = {
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.send(7, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        assert_eq!(rx.recv(&cancel).await.unwrap(), 7);
        assert_eq!(sender.await.unwrap().unwrap(), Delivery::Delivered);
    }

    #[tokio::test]
    async fn cancelled_send_does_not_leave_value_behind() {
        let (mut tx, mut rx) = channel::<u32>();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(tx.send(1, &cancel).await.unwrap_err().is_interrupted());

        let live = CancellationToken::new();
        let sender = tokio::spawn(async move { tx.send(2, &live).await });
        assert_eq!(rx.recv(&CancellationToken::new()).await.unwrap(), 2);
        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_ends_stream() {
        let (tx, mut rx) = channel::<u32>();
        drop(tx);
        assert!(rx.recv(&CancellationToken::new()).await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn dropped_receiver_disconnects() {
        let (mut tx, rx) = channel::<u32>();
        drop(rx);
        let delivery = tx.send(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(delivery, Delivery::Disconnected);
    }
}
