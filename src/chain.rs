//! Infinite streams built from a sequence of finite ones.
//!
//! A [`Chained`] stream pulls from its current stream until it ends, then asks
//! a continuation for the next one given the last value it saw. The
//! continuation's first value is assumed to repeat that last value (for
//! example "check from version V" answers with V first) and is discarded.

use crate::error::{Error, Result};
use crate::stream::{BoxStream, Stream};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Continuation<T> =
    Box<dyn FnMut(Option<T>) -> BoxFuture<'static, anyhow::Result<BoxStream<T>>> + Send>;

/// Stream returned by [`chain`].
pub struct Chained<T> {
    stream: BoxStream<T>,
    continuation: Continuation<T>,
    last: Option<T>,
    // set between installing a continuation stream and discarding its first value
    skip_pending: bool,
}

/// Turn `stream` into an unbounded stream that is extended by `continuation`
/// each time the current stream ends.
///
/// The continuation receives the last value seen so far, or `None` if the chain
/// has not produced anything yet. In the latter case there is nothing to
/// duplicate and no value is discarded.
pub fn chain<T, F, Fut>(stream: BoxStream<T>, mut continuation: F) -> Chained<T>
where
    T: Send + 'static,
    F: FnMut(Option<T>) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<BoxStream<T>>> + Send + 'static,
{
    Chained {
        stream,
        continuation: Box::new(move |last| Box::pin(continuation(last))),
        last: None,
        skip_pending: false,
    }
}

impl<T: Clone + Send + 'static> Chained<T> {
    async fn advance(&mut self, cancel: &CancellationToken) -> Result<()> {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Interrupted),
            next = (self.continuation)(self.last.clone()) => next.map_err(Error::continuation)?,
        };

        let mut previous = std::mem::replace(&mut self.stream, next);
        previous.close().await.map_err(|err| {
            Error::Close(vec![("previous".to_string(), err)])
        })?;
        self.skip_pending = self.last.is_some();
        Ok(())
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Stream<T> for Chained<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<T> {
        loop {
            if self.skip_pending {
                match self.stream.next(cancel).await {
                    Ok(_) => {
                        debug!("skipped first object of continuation");
                        self.skip_pending = false;
                    }
                    Err(Error::Interrupted) => return Err(Error::Interrupted),
                    Err(err) => return Err(Error::SkipFirst(Box::new(err))),
                }
            }

            match self.stream.next(cancel).await {
                Ok(value) => {
                    self.last = Some(value.clone());
                    return Ok(value);
                }
                Err(Error::EndOfStream) => self.advance(cancel).await?,
                Err(err) => return Err(err),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        debug!("closing chained stream");
        self.stream.close().await
    }
}
