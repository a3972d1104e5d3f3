//! Error taxonomy shared by every stream in the engine.
//!
//! Two variants are control flow rather than failures:
//!
//! - [`Error::EndOfStream`] - the stream finished naturally; loops that pull
//!   until done should stop quietly.
//! - [`Error::Interrupted`] - the cancellation token fired while the call was
//!   blocked. Callers use this to tell "cancelled" from "finished".
//!
//! Everything else is a real failure. Collaborator errors (checks, loaders) are
//! carried verbatim as [`Error::Source`]; `close` aggregates every sub-stream
//! failure into [`Error::Close`] instead of stopping at the first one.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by [`Stream`](crate::Stream) implementations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The stream has no more values and never will.
    #[error("end of stream")]
    EndOfStream,

    /// The cancellation token fired while waiting.
    #[error("stream interrupted")]
    Interrupted,

    /// An upstream loader or check failed.
    #[error("{0:#}")]
    Source(Arc<anyhow::Error>),

    /// A chained stream's continuation failed to produce the next stream.
    #[error("continue: {0:#}")]
    Continuation(Arc<anyhow::Error>),

    /// A chained stream failed to discard the duplicated first value of its
    /// continuation.
    #[error("skip first object: {0}")]
    SkipFirst(Box<Error>),

    /// One or more underlying streams failed to close.
    #[error("{}", CloseErrors(.0))]
    Close(Vec<(String, Error)>),
}

impl Error {
    /// Wrap a collaborator error.
    pub fn upstream(err: anyhow::Error) -> Self {
        Error::Source(Arc::new(err))
    }

    /// Wrap a continuation error.
    pub fn continuation(err: anyhow::Error) -> Self {
        Error::Continuation(Arc::new(err))
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Collapse a list of labelled close failures; `Ok` when the list is empty.
    pub(crate) fn from_close_errors(errors: Vec<(String, Error)>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Close(errors))
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::upstream(err)
    }
}

struct CloseErrors<'a>(&'a [(String, Error)]);

impl fmt::Display for CloseErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stream(s) failed to close", self.0.len())?;
        for (label, err) in self.0 {
            write!(f, "\n\t* close stream {label}: {err}")?;
        }
        Ok(())
    }
}
