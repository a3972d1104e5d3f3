//! # conflux
//!
//! A **streaming dependency-resolution engine** for CI-style pipelines. Resources
//! produce an unbounded, time-ordered sequence of versions; jobs consume tuples
//! of versions, either straight from resources or only once upstream jobs have
//! built them successfully.
//!
//! ## Key Features
//!
//! - **Composable streams** - a pull-based, cancellable [`Stream`] trait with
//!   boxing and mapping combinators
//! - **Broadcast** - fan a stream out to a fixed set of subscribers
//! - **Aggregate** - merge independent named streams into complete tuples
//! - **Intersect** - merge dependent tuple streams into consistent,
//!   corroborated tuples
//! - **Chain** - turn repeated bounded checks into an infinite polling stream
//! - **Pipeline driver** - wire resources and jobs together and run builds
//!
//! ## Quick Start
//!
//! ```no_run
//! use conflux::config::PipelineConfig;
//! use conflux::testing::{RecordingExecutor, ScriptedChecker};
//! use conflux::{Pipeline, Runner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let pipeline = Pipeline::from_file("pipeline.toml")?;
//! let runner = Runner::new(
//!     Arc::new(ScriptedChecker::new().with_versions("repo", [1, 2, 3])),
//!     Arc::new(RecordingExecutor::new()),
//! );
//!
//! let cancel = CancellationToken::new();
//! runner.run(&pipeline, &cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Streams
//!
//! Every component is a [`Stream`]: `next` blocks until a value, the end of the
//! stream ([`Error::EndOfStream`]) or cancellation ([`Error::Interrupted`]).
//! Cancellation is a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! passed to every blocking call.
//!
//! ### Objects
//!
//! An [`Object<T>`] maps input names to values. Two objects are *compatible*
//! when they agree on every key they share.
//!
//! ### Pipelines
//!
//! A [`Pipeline`] is a validated [`PipelineConfig`](config::PipelineConfig).
//! The [`planner`] decides how each job's inputs are assembled and the
//! [`Runner`] executes the plan.

pub mod aggregate;
pub mod broadcast;
pub mod chain;
pub mod config;
pub mod error;
mod handoff;
pub mod ids;
pub mod intersect;
pub mod metrics;
pub mod object;
pub mod pipeline;
pub mod planner;
pub mod resource;
pub mod runner;
pub mod source;
pub mod stream;
pub mod testing;
pub mod validation;

pub use aggregate::{Aggregated, aggregate};
pub use broadcast::{Broadcast, BroadcastBuilder, Subscription};
pub use chain::{Chained, chain};
pub use error::{Error, Result};
pub use ids::{JobId, ResourceId};
pub use intersect::{IntersectInput, IntersectOptions, Intersection, intersect, intersect_with};
pub use object::{Keyword, Object};
pub use pipeline::Pipeline;
pub use resource::{ResourceChecker, ResourceVersion};
pub use runner::{BuildContext, BuildExecutor, RunOptions, Runner};
pub use source::BoundedStream;
pub use stream::{BoxStream, Stream, StreamExt};
