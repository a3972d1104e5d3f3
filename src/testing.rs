//! Testing utilities for conflux pipelines and streams.
//!
//! - **Fakes**: [`ScriptedChecker`] and [`RecordingExecutor`] stand in for the
//!   external check and build collaborators
//! - **Stream helpers**: drain or sample any [`Stream`](crate::Stream) with a
//!   timeout guard
//! - **Assertions**: compare tuples and version sequences with readable output
//! - **Fixtures**: ready-made pipeline configurations
//!
//! # Quick Start
//!
//! ```no_run
//! use conflux::testing::*;
//! use conflux::{Pipeline, Runner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! init_tracing();
//! let checker = Arc::new(ScriptedChecker::new().with_versions("repo", [1, 2]));
//! let executor = Arc::new(RecordingExecutor::new());
//! let pipeline = Pipeline::new(linear_pipeline())?;
//!
//! Runner::new(checker, executor.clone())
//!     .run(&pipeline, &CancellationToken::new())
//!     .await?;
//! assert_eq!(executor.builds_of("unit").len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fakes;
pub mod fixtures;
pub mod streams;

pub use assertions::*;
pub use fakes::*;
pub use fixtures::*;
pub use streams::*;

use std::time::Duration;

/// Upper bound used by the helpers for any single wait.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize test logging (safe to call from every test).
///
/// Honours `RUST_LOG`; defaults to `conflux=debug`.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conflux=debug"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}
