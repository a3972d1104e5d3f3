//! Resource versions and the polling streams built from checks.

use crate::chain::{Chained, chain};
use crate::config::ResourceConfig;
use crate::source::BoundedStream;
use crate::stream::StreamExt;
use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A single version of a resource, as reported by a check.
///
/// Two versions are equal when they belong to the same resource and carry the
/// same payload; metadata is informational only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceVersion {
    pub resource: String,
    pub version: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataField>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

impl ResourceVersion {
    pub fn new(resource: impl Into<String>, version: Value) -> Self {
        Self {
            resource: resource.into(),
            version,
            metadata: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push(MetadataField {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

impl PartialEq for ResourceVersion {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.version == other.version
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource, self.version)
    }
}

/// Reports the versions of a resource.
#[async_trait]
pub trait ResourceChecker: Send + Sync {
    /// Return the versions of `resource` in chronological order.
    ///
    /// With `from` set, the answer starts at `from` itself (if it still exists)
    /// followed by everything newer. Without it, the checker may return its
    /// whole history; only the last entry is used.
    async fn check(
        &self,
        resource: &ResourceConfig,
        from: Option<&Value>,
    ) -> anyhow::Result<Vec<ResourceVersion>>;
}

/// A finite stream over a single check of `resource`.
///
/// The check runs on the first pull. With no `from` only the latest version is
/// kept.
pub fn check_stream(
    resource: Arc<ResourceConfig>,
    checker: Arc<dyn ResourceChecker>,
    from: Option<Value>,
) -> BoundedStream<ResourceVersion> {
    BoundedStream::new(move || async move {
        let mut versions = checker
            .check(&resource, from.as_ref())
            .await
            .with_context(|| format!("checking resource {}", resource.name))?;
        if from.is_none() && versions.len() > 1 {
            let older = versions.len() - 1;
            versions.drain(..older);
        }
        debug!(resource = %resource.name, count = versions.len(), "check finished");
        Ok(versions)
    })
}

/// An unbounded stream of every version of `resource`, re-checking every
/// `interval` from the last version seen.
pub fn version_stream(
    resource: Arc<ResourceConfig>,
    checker: Arc<dyn ResourceChecker>,
    from: Option<Value>,
    interval: Duration,
) -> Chained<ResourceVersion> {
    let first = check_stream(Arc::clone(&resource), Arc::clone(&checker), from.clone()).boxed();
    chain(first, move |last: Option<ResourceVersion>| {
        let resource = Arc::clone(&resource);
        let checker = Arc::clone(&checker);
        let from = last.map(|v| v.version).or_else(|| from.clone());
        async move {
            tokio::time::sleep(interval).await;
            Ok(check_stream(resource, checker, from).boxed())
        }
    })
}

/// Check `resource` once and return its newest version.
///
/// # Errors
///
/// If the check fails or reports no versions.
pub async fn latest_version(
    resource: &ResourceConfig,
    checker: &dyn ResourceChecker,
) -> anyhow::Result<ResourceVersion> {
    let versions = checker
        .check(resource, None)
        .await
        .with_context(|| format!("checking resource {}", resource.name))?;
    let Some(latest) = versions.into_iter().last() else {
        bail!("resource {} has no versions", resource.name);
    };
    info!(resource = %resource.name, version = %latest.version, "latest version");
    Ok(latest)
}
