//! Helpers for pulling values out of streams in tests.

use super::TEST_TIMEOUT;
use crate::error::{Error, Result};
use crate::source::BoundedStream;
use crate::stream::{BoxStream, Stream, StreamExt};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A boxed, already-loaded stream over `values`.
pub fn from_values<T: Send + 'static>(values: impl IntoIterator<Item = T>) -> BoxStream<T> {
    BoundedStream::from_vec(values.into_iter().collect()).boxed()
}

/// Pull until the stream ends and return everything it produced.
///
/// # Errors
///
/// Any error other than [`Error::EndOfStream`], or [`Error::Interrupted`] if the
/// stream has not ended within [`TEST_TIMEOUT`].
pub async fn collect<T, S>(stream: &mut S) -> Result<Vec<T>>
where
    S: Stream<T> + ?Sized,
{
    let cancel = CancellationToken::new();
    let mut out = Vec::new();
    let drained = tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            match stream.next(&cancel).await {
                Ok(value) => out.push(value),
                Err(Error::EndOfStream) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    })
    .await;
    match drained {
        Ok(result) => result.map(|()| out),
        Err(_) => Err(Error::Interrupted),
    }
}

/// Pull exactly `n` values.
///
/// # Errors
///
/// Any stream error, including [`Error::EndOfStream`] if fewer than `n` values
/// exist, or [`Error::Interrupted`] after [`TEST_TIMEOUT`].
pub async fn take<T, S>(stream: &mut S, n: usize) -> Result<Vec<T>>
where
    S: Stream<T> + ?Sized,
{
    let cancel = CancellationToken::new();
    let mut out = Vec::with_capacity(n);
    let taken = tokio::time::timeout(TEST_TIMEOUT, async {
        while out.len() < n {
            out.push(stream.next(&cancel).await?);
        }
        Ok::<(), Error>(())
    })
    .await;
    match taken {
        Ok(result) => result.map(|()| out),
        Err(_) => Err(Error::Interrupted),
    }
}

/// Returns `true` if the stream stays silent for `wait`.
pub async fn stays_silent<T, S>(stream: &mut S, wait: std::time::Duration) -> bool
where
    S: Stream<T> + ?Sized,
{
    let cancel = CancellationToken::new();
    tokio::time::timeout(wait, stream.next(&cancel)).await.is_err()
}

/// Logs every value passing through at `debug`, labelled.
pub struct Inspect<S> {
    inner: S,
    label: String,
}

/// Wrap `stream` so every value is logged under `label`.
pub fn inspect<S>(stream: S, label: impl Into<String>) -> Inspect<S> {
    Inspect {
        inner: stream,
        label: label.into(),
    }
}

#[async_trait]
impl<T, S> Stream<T> for Inspect<S>
where
    T: Debug + Send + 'static,
    S: Stream<T>,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<T> {
        let result = self.inner.next(cancel).await;
        match &result {
            Ok(value) => debug!(label = %self.label, ?value, "value"),
            Err(err) => debug!(label = %self.label, %err, "no value"),
        }
        result
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
