//! Lazily loaded, finite streams.

use crate::error::{Error, Result};
use crate::stream::Stream;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Loader<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Vec<T>>> + Send>;

enum State<T> {
    Unloaded(Loader<T>),
    Loading(BoxFuture<'static, anyhow::Result<Vec<T>>>),
    Loaded(VecDeque<T>),
    Failed(Arc<anyhow::Error>),
    // transient, only observed if a poll panics mid-transition
    Empty,
}

/// A finite stream backed by a one-shot loader.
///
/// The loader runs on the first call to [`next`](Stream::next) and never again.
/// If that call is cancelled while the load is in flight, the pending load is
/// kept and resumed by the following call.
pub struct BoundedStream<T> {
    state: State<T>,
    closed: bool,
}

impl<T: Send + 'static> BoundedStream<T> {
    /// Create a stream whose values come from `load`.
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        let loader: Loader<T> = Box::new(move || Box::pin(load()));
        Self {
            state: State::Unloaded(loader),
            closed: false,
        }
    }

    /// Create an already loaded stream.
    #[must_use]
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            state: State::Loaded(values.into()),
            closed: false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn ensure_loaded(&mut self, cancel: &CancellationToken) -> Result<()> {
        if matches!(self.state, State::Unloaded(_)) {
            if let State::Unloaded(load) = std::mem::replace(&mut self.state, State::Empty) {
                self.state = State::Loading(load());
            }
        }

        if let State::Loading(fut) = &mut self.state {
            let loaded = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Interrupted),
                loaded = fut => loaded,
            };
            self.state = match loaded {
                Ok(values) => State::Loaded(values.into()),
                Err(err) => State::Failed(Arc::new(err)),
            };
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send + 'static> Stream<T> for BoundedStream<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<T> {
        if self.closed {
            return Err(Error::EndOfStream);
        }
        self.ensure_loaded(cancel).await?;
        match &mut self.state {
            State::Loaded(values) => values.pop_front().ok_or(Error::EndOfStream),
            State::Failed(err) => Err(Error::Source(Arc::clone(err))),
            State::Unloaded(_) | State::Loading(_) | State::Empty => Err(Error::EndOfStream),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
