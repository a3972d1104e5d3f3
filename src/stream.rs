//! The pull-based [`Stream`] abstraction every component implements or decorates.

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A pull-based, possibly infinite sequence of values.
///
/// `next` blocks until a value is available, the stream ends
/// ([`Error::EndOfStream`](crate::Error::EndOfStream)), or `cancel` fires
/// ([`Error::Interrupted`](crate::Error::Interrupted)). Implementations must
/// race every blocking wait against the token.
///
/// `close` releases the stream's resources and is called at most once by the
/// owner of the stream.
#[async_trait]
pub trait Stream<T>: Send {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<T>;

    async fn close(&mut self) -> Result<()>;
}

/// Type-erased stream, used wherever streams of different kinds are mixed.
pub type BoxStream<T> = Box<dyn Stream<T>>;

#[async_trait]
impl<T: Send + 'static> Stream<T> for BoxStream<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<T> {
        (**self).next(cancel).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Combinators available on every sized stream.
pub trait StreamExt<T>: Stream<T> + Sized + 'static {
    /// Erase the concrete stream type.
    fn boxed(self) -> BoxStream<T> {
        Box::new(self)
    }

    /// Transform every value with `f`.
    fn map<U, F>(self, f: F) -> Mapped<Self, F, T>
    where
        F: FnMut(T) -> U + Send,
    {
        Mapped {
            inner: self,
            f,
            _marker: std::marker::PhantomData,
        }
    }

    /// Transform values with `f`, dropping those for which it returns `None`.
    fn filter_map<U, F>(self, f: F) -> FilterMapped<Self, F, T>
    where
        F: FnMut(T) -> Option<U> + Send,
    {
        FilterMapped {
            inner: self,
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, S: Stream<T> + Sized + 'static> StreamExt<T> for S {}

/// Stream returned by [`StreamExt::map`].
pub struct Mapped<S, F, T> {
    inner: S,
    f: F,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[async_trait]
impl<S, F, T, U> Stream<U> for Mapped<S, F, T>
where
    S: Stream<T>,
    F: FnMut(T) -> U + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<U> {
        let value = self.inner.next(cancel).await?;
        Ok((self.f)(value))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Stream returned by [`StreamExt::filter_map`].
pub struct FilterMapped<S, F, T> {
    inner: S,
    f: F,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[async_trait]
impl<S, F, T, U> Stream<U> for FilterMapped<S, F, T>
where
    S: Stream<T>,
    F: FnMut(T) -> Option<U> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<U> {
        loop {
            let value = self.inner.next(cancel).await?;
            if let Some(mapped) = (self.f)(value) {
                return Ok(mapped);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
