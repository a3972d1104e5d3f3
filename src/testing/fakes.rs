//! In-memory stand-ins for the check and build collaborators.

use super::TEST_TIMEOUT;
use crate::config::ResourceConfig;
use crate::resource::{ResourceChecker, ResourceVersion};
use crate::runner::{BuildContext, BuildExecutor};
use anyhow::bail;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call made to a [`ScriptedChecker`].
#[derive(Clone, Debug, PartialEq)]
pub struct CheckCall {
    pub resource: String,
    pub from: Option<Value>,
}

/// A checker answering from per-resource version histories.
///
/// Versions are `{"v": n}` payloads. A check from a version returns that
/// version and everything after it; a check from an unknown version (or from
/// nothing) returns the whole history.
#[derive(Default)]
pub struct ScriptedChecker {
    histories: Mutex<HashMap<String, Vec<Value>>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<CheckCall>>,
}

impl ScriptedChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_versions<V: Into<Value>>(self, resource: &str, versions: impl IntoIterator<Item = V>) -> Self {
        for v in versions {
            self.push_version(resource, v);
        }
        self
    }

    /// Make every check of `resource` fail with `message`.
    #[must_use]
    pub fn failing(self, resource: &str, message: &str) -> Self {
        lock(&self.failures).insert(resource.to_string(), message.to_string());
        self
    }

    /// Append a new version; later checks will discover it.
    pub fn push_version(&self, resource: &str, v: impl Into<Value>) {
        lock(&self.histories)
            .entry(resource.to_string())
            .or_default()
            .push(json!({ "v": v.into() }));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CheckCall> {
        lock(&self.calls).clone()
    }

    #[must_use]
    pub fn calls_for(&self, resource: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.resource == resource).count()
    }
}

#[async_trait]
impl ResourceChecker for ScriptedChecker {
    async fn check(
        &self,
        resource: &ResourceConfig,
        from: Option<&Value>,
    ) -> anyhow::Result<Vec<ResourceVersion>> {
        lock(&self.calls).push(CheckCall {
            resource: resource.name.clone(),
            from: from.cloned(),
        });
        if let Some(message) = lock(&self.failures).get(&resource.name) {
            bail!("{message}");
        }

        let histories = lock(&self.histories);
        let history = histories.get(&resource.name).map_or(&[][..], Vec::as_slice);
        let start = from
            .and_then(|from| history.iter().position(|v| v == from))
            .unwrap_or(0);
        Ok(history[start..]
            .iter()
            .map(|v| ResourceVersion::new(resource.name.clone(), v.clone()))
            .collect())
    }
}

/// An executor that records every build and fails the jobs it is told to.
#[derive(Default)]
pub struct RecordingExecutor {
    builds: Mutex<Vec<BuildContext>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl RecordingExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every build of `job` fail.
    #[must_use]
    pub fn failing(self, job: &str) -> Self {
        lock(&self.failing).insert(job.to_string());
        self
    }

    /// Make each build take `delay` (cancellable).
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn builds(&self) -> Vec<BuildContext> {
        lock(&self.builds).clone()
    }

    #[must_use]
    pub fn builds_of(&self, job: &str) -> Vec<BuildContext> {
        lock(&self.builds).iter().filter(|b| b.job == job).cloned().collect()
    }

    /// Wait until `job` has been built at least `n` times.
    ///
    /// # Errors
    ///
    /// If that does not happen within [`TEST_TIMEOUT`].
    pub async fn wait_for_builds(&self, job: &str, n: usize) -> anyhow::Result<Vec<BuildContext>> {
        let waited = tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                let builds = self.builds_of(job);
                if builds.len() >= n {
                    return builds;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match waited {
            Ok(builds) => Ok(builds),
            Err(_) => bail!("job {job} built {} time(s), expected {n}", self.builds_of(job).len()),
        }
    }
}

#[async_trait]
impl BuildExecutor for RecordingExecutor {
    async fn execute(&self, build: &BuildContext) -> anyhow::Result<()> {
        lock(&self.builds).push(build.clone());
        if let Some(delay) = self.delay {
            tokio::select! {
                () = build.cancel.cancelled() => bail!("build {} of {} aborted", build.build, build.job),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if lock(&self.failing).contains(&build.job) {
            bail!("build {} of {} failed", build.build, build.job);
        }
        Ok(())
    }
}
