//! Pre-built pipeline configurations and version helpers.

use crate::config::{CheckEvery, InputConfig, JobConfig, PipelineConfig, ResourceConfig};
use crate::object::Object;
use crate::resource::ResourceVersion;
use serde_json::{Value, json};

/// A version of `resource` whose payload is `{"v": <v>}`.
///
/// # Example
///
/// ```
/// use conflux::testing::version;
///
/// assert_eq!(version("repo", 3).version["v"], 3);
/// ```
#[must_use]
pub fn version(resource: &str, v: impl Into<Value>) -> ResourceVersion {
    ResourceVersion::new(resource, json!({ "v": v.into() }))
}

/// Build an input tuple from `(input name, resource, v)` triples.
#[must_use]
pub fn tuple(entries: &[(&str, &str, i64)]) -> Object<ResourceVersion> {
    entries
        .iter()
        .map(|(name, resource, v)| (*name, version(resource, *v)))
        .collect()
}

/// A resource that is checked exactly once.
#[must_use]
pub fn single_check_resource(name: &str) -> ResourceConfig {
    ResourceConfig::new(name, "mock").with_check_every(CheckEvery::Never)
}

/// `repo -> unit -> deploy`, where `deploy` only takes versions `unit` passed.
#[must_use]
pub fn linear_pipeline() -> PipelineConfig {
    PipelineConfig::default()
        .with_resource(single_check_resource("repo"))
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo")))
        .with_job(JobConfig::new("deploy").with_input(InputConfig::new("repo").passed(["unit"])))
}

/// Two test jobs on `repo` feeding `deploy`, which also takes `config` directly.
#[must_use]
pub fn fan_in_pipeline() -> PipelineConfig {
    PipelineConfig::default()
        .with_resource(single_check_resource("repo"))
        .with_resource(single_check_resource("config"))
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo")))
        .with_job(JobConfig::new("lint").with_input(InputConfig::new("repo")))
        .with_job(
            JobConfig::new("deploy")
                .with_input(InputConfig::new("repo").passed(["unit", "lint"]))
                .with_input(InputConfig::new("config")),
        )
}
