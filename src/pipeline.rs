use crate::config::{JobConfig, PipelineConfig, ResourceConfig};
use crate::ids::{JobId, ResourceId};
use crate::validation::{Validate, ValidationReport};
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// -------- Pipeline --------
/// A validated pipeline: resources and jobs indexed by id and by name.
///
/// Entities never point back at their pipeline; the runner and planner pass
/// the pipeline alongside the ids they work with.
#[derive(Clone, Debug)]
pub struct Pipeline {
    resources: Vec<Arc<ResourceConfig>>,
    jobs: Vec<Arc<JobConfig>>,
    resource_index: HashMap<String, ResourceId>,
    job_index: HashMap<String, JobId>,
}

impl Pipeline {
    /// Validate `config` and index its resources and jobs.
    ///
    /// # Errors
    ///
    /// A [`ValidationReport`] listing every problem in the configuration.
    pub fn new(config: PipelineConfig) -> anyhow::Result<Self> {
        config.validate().map_err(ValidationReport)?;

        let resource_index = config
            .resources
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.name.clone(), ResourceId::new(idx)))
            .collect();
        let job_index = config
            .jobs
            .iter()
            .enumerate()
            .map(|(idx, j)| (j.name.clone(), JobId::new(idx)))
            .collect();

        Ok(Self {
            resources: config.resources.into_iter().map(Arc::new).collect(),
            jobs: config.jobs.into_iter().map(Arc::new).collect(),
            resource_index,
            job_index,
        })
    }

    /// Load and validate a pipeline from a JSON or TOML file.
    ///
    /// # Errors
    ///
    /// If the file cannot be loaded or the configuration is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = PipelineConfig::from_file(path)?;
        Self::new(config).with_context(|| format!("validating {}", path.display()))
    }

    #[must_use]
    pub fn resource(&self, id: ResourceId) -> Option<&ResourceConfig> {
        self.resources.get(id.index()).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn job(&self, id: JobId) -> Option<&JobConfig> {
        self.jobs.get(id.index()).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_index.get(name).copied()
    }

    #[must_use]
    pub fn job_id(&self, name: &str) -> Option<JobId> {
        self.job_index.get(name).copied()
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        (0..self.resources.len()).map(ResourceId::new)
    }

    pub fn job_ids(&self) -> impl Iterator<Item = JobId> + '_ {
        (0..self.jobs.len()).map(JobId::new)
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn shared_resource(&self, id: ResourceId) -> Option<Arc<ResourceConfig>> {
        self.resources.get(id.index()).cloned()
    }

    pub(crate) fn shared_job(&self, id: JobId) -> Option<Arc<JobConfig>> {
        self.jobs.get(id.index()).cloned()
    }
}
