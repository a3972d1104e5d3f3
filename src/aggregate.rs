//! Merge independent named streams into one stream of complete tuples.
//!
//! Each named stream gets a fan-in task that forwards its values, tagged with
//! the name, into one shared channel. The channel has a single slot: with it
//! full, every fan-in task waits on its send and stops pulling, so an input
//! runs at most one value ahead of the consumer besides the buffered arrival.
//! The aggregate then runs in two phases:
//!
//! 1. Until the first complete tuple, block until every name has a value. The
//!    first tuple carries each stream's *first* value; anything a stream sends
//!    while others are still missing is held back.
//! 2. Afterwards, fold in everything that is immediately available (held-back
//!    values first, then the buffered arrival) and return the snapshot if
//!    anything changed. If nothing is
//!    ready, block and return on the next arrival.

use crate::error::{Error, Result};
use crate::object::{Keyword, Object};
use crate::stream::{BoxStream, Stream};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum Arrival<T> {
    Value(T),
    Ended,
    Failed(Error),
}

type Tagged<T> = (Keyword, Arrival<T>);

/// Stream returned by [`aggregate`].
pub struct Aggregated<T> {
    arity: usize,
    arrivals: mpsc::Receiver<Tagged<T>>,
    readers: Vec<(Keyword, JoinHandle<Result<()>>)>,
    shutdown: CancellationToken,
    current: Object<T>,
    held: Object<T>,
    complete: bool,
}

/// Aggregate named streams into a stream of [`Object`]s keyed by name.
///
/// The fan-in tasks run until `cancel` fires or the aggregate is closed, so this
/// must be called from within a tokio runtime.
pub fn aggregate<T, K, I>(cancel: &CancellationToken, streams: I) -> Aggregated<T>
where
    T: Clone + Send + 'static,
    K: Into<Keyword>,
    I: IntoIterator<Item = (K, BoxStream<T>)>,
{
    let shutdown = cancel.child_token();
    // one slot keeps backpressure on the inputs while phase 2 can still batch
    let (tx, arrivals) = mpsc::channel(1);

    let readers: Vec<_> = streams
        .into_iter()
        .map(|(name, stream)| {
            let name: Keyword = name.into();
            let handle = tokio::spawn(forward(name.clone(), stream, tx.clone(), shutdown.clone()));
            (name, handle)
        })
        .collect();

    Aggregated {
        arity: readers.len(),
        arrivals,
        readers,
        shutdown,
        current: Object::new(),
        held: Object::new(),
        complete: false,
    }
}

async fn forward<T: Send + 'static>(
    name: Keyword,
    mut stream: BoxStream<T>,
    tx: mpsc::Sender<Tagged<T>>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let arrival = match stream.next(&shutdown).await {
            Ok(value) => Arrival::Value(value),
            Err(Error::Interrupted) => break,
            Err(Error::EndOfStream) => Arrival::Ended,
            Err(err) => Arrival::Failed(err),
        };
        let last = !matches!(arrival, Arrival::Value(_));

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            sent = tx.send((name.clone(), arrival)) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        if last {
            break;
        }
    }
    debug!(stream = %name, "aggregate input finished");
    stream.close().await
}

impl<T: Clone + Send + 'static> Aggregated<T> {
    /// Number of named input streams.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    async fn recv(&mut self, cancel: &CancellationToken) -> Result<Tagged<T>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Interrupted),
            arrival = self.arrivals.recv() => arrival.ok_or(Error::EndOfStream),
        }
    }

    async fn first_complete(&mut self, cancel: &CancellationToken) -> Result<Object<T>> {
        while self.current.len() < self.arity {
            let (name, arrival) = self.recv(cancel).await?;
            match arrival {
                Arrival::Value(value) if self.current.contains_key(&name) => {
                    self.held.insert(name, value);
                }
                Arrival::Value(value) => {
                    self.current.insert(name, value);
                }
                // a name that never produced can no longer complete the tuple
                Arrival::Ended if !self.current.contains_key(&name) => {
                    debug!(stream = %name, "aggregate input ended before producing");
                    return Err(Error::EndOfStream);
                }
                Arrival::Ended => {}
                Arrival::Failed(err) => return Err(err),
            }
        }
        self.complete = true;
        Ok(self.current.clone())
    }

    async fn next_update(&mut self, cancel: &CancellationToken) -> Result<Object<T>> {
        let mut changed = !self.held.is_empty();
        for (name, value) in std::mem::take(&mut self.held) {
            self.current.insert(name, value);
        }

        loop {
            match self.arrivals.try_recv() {
                Ok((name, Arrival::Value(value))) => {
                    self.current.insert(name, value);
                    changed = true;
                }
                Ok((_, Arrival::Ended)) => {}
                Ok((_, Arrival::Failed(err))) => return Err(err),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if changed {
            return Ok(self.current.clone());
        }

        loop {
            match self.recv(cancel).await? {
                (name, Arrival::Value(value)) => {
                    self.current.insert(name, value);
                    return Ok(self.current.clone());
                }
                (_, Arrival::Ended) => {}
                (_, Arrival::Failed(err)) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Stream<Object<T>> for Aggregated<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Object<T>> {
        if self.arity == 0 {
            return Err(Error::EndOfStream);
        }
        if self.complete {
            self.next_update(cancel).await
        } else {
            self.first_complete(cancel).await
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown.cancel();
        let mut errors = Vec::new();
        for (name, reader) in self.readers.drain(..) {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push((name, err)),
                Err(join) => errors.push((name, Error::upstream(anyhow::anyhow!("reader task failed: {join}")))),
            }
        }
        Error::from_close_errors(errors)
    }
}

impl<T> Drop for Aggregated<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
