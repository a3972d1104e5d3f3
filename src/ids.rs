//! Lightweight handles for the resources and jobs of a [`Pipeline`](crate::pipeline::Pipeline).
//!
//! Ids are assigned in declaration order when the pipeline is built. They're
//! small, `Copy`, and hashable, so the planner and runner use them as map keys
//! instead of holding references back into the pipeline.

use std::fmt;

/// Index of a resource within its pipeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ResourceId(usize);

/// Index of a job within its pipeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct JobId(usize);

impl ResourceId {
    pub(crate) fn new(v: usize) -> Self {
        Self(v)
    }

    /// Position of the resource in the pipeline configuration.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl JobId {
    pub(crate) fn new(v: usize) -> Self {
        Self(v)
    }

    /// Position of the job in the pipeline configuration.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}
