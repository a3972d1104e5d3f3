use crate::aggregate::aggregate;
use crate::broadcast::{Broadcast, BroadcastBuilder};
use crate::config::{CheckEvery, JobConfig, ResourceConfig};
use crate::error::Error;
use crate::ids::JobId;
use crate::intersect::{IntersectInput, IntersectOptions, intersect_with};
use crate::metrics::{self, MetricsCollector};
use crate::object::Object;
use crate::pipeline::Pipeline;
use crate::planner::{Binding, InputStrategy, JobPlan, build_plan};
use crate::resource::{ResourceChecker, ResourceVersion, check_stream, latest_version, version_stream};
use crate::stream::{BoxStream, Stream, StreamExt};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything an executor needs to run one build.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub job: String,
    /// Build number, unique per [`Runner`].
    pub build: u64,
    /// The job's plan, passed through from the configuration.
    pub plan: Value,
    pub inputs: Object<ResourceVersion>,
    /// Fires when the run is shutting down.
    pub cancel: CancellationToken,
}

/// Runs a job's build plan.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Run the build; an error marks the build as failed.
    async fn execute(&self, build: &BuildContext) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    /// Overrides every resource's `check_every` when set.
    pub check_every: Option<CheckEvery>,
    /// Bound on in-flight intersection candidates per job.
    pub max_candidates: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check_every: None,
            max_candidates: Some(1024),
        }
    }
}

/// Drives a [`Pipeline`]: polls resources, resolves job inputs and runs builds.
#[derive(Clone)]
pub struct Runner {
    checker: Arc<dyn ResourceChecker>,
    executor: Arc<dyn BuildExecutor>,
    pub options: RunOptions,
    metrics: Option<MetricsCollector>,
    next_build: Arc<AtomicU64>,
}

impl Runner {
    pub fn new(checker: Arc<dyn ResourceChecker>, executor: Arc<dyn BuildExecutor>) -> Self {
        Self {
            checker,
            executor,
            options: RunOptions::default(),
            metrics: None,
            next_build: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }

    /// Run `pipeline` until every loop finishes, `cancel` fires, or a loop
    /// fails.
    ///
    /// Every resource gets a polling task and every job a build loop, all in
    /// one task group. The first failing task cancels the rest and its error is
    /// returned. Cancellation is not an error.
    ///
    /// # Errors
    ///
    /// A failed check, a broken input stream, or a panicked task.
    pub async fn run(&self, pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
        let plan = build_plan(pipeline)?;
        let group = cancel.child_token();
        self.record_start();

        let mut resource_feeds: Vec<BroadcastBuilder<ResourceVersion>> = pipeline
            .resource_ids()
            .filter_map(|id| pipeline.resource(id))
            .map(|r| BroadcastBuilder::labelled(format!("resource {}", r.name)))
            .collect();
        let mut job_feeds: Vec<BroadcastBuilder<Object<ResourceVersion>>> = plan
            .jobs
            .iter()
            .map(|j| BroadcastBuilder::labelled(format!("job {}", j.name)))
            .collect();

        // every subscription exists before any broadcast starts
        let mut job_inputs = Vec::with_capacity(plan.jobs.len());
        for job_plan in &plan.jobs {
            job_inputs.push(self.input_stream(job_plan, &mut resource_feeds, &mut job_feeds, &group)?);
        }

        let mut tasks = JoinSet::new();
        for ((job_plan, inputs), feed) in plan.jobs.iter().zip(job_inputs).zip(job_feeds) {
            let job = pipeline
                .shared_job(job_plan.job)
                .with_context(|| format!("missing {}", job_plan.job))?;
            tasks.spawn(self.clone().job_loop(job, inputs, feed.start(), group.clone()));
        }
        for (id, feed) in pipeline.resource_ids().zip(resource_feeds) {
            let resource = pipeline
                .shared_resource(id)
                .with_context(|| format!("missing {id}"))?;
            let versions = self.versions(Arc::clone(&resource));
            tasks.spawn(self.clone().resource_loop(resource, versions, feed.start(), group.clone()));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|err| anyhow!("pipeline task panicked: {err}")).and_then(|r| r);
            let Err(err) = result else {
                continue;
            };
            if first_error.is_none() {
                error!(error = %format!("{err:#}"), "pipeline task failed, stopping run");
                group.cancel();
                first_error = Some(err);
            } else {
                debug!(error = %format!("{err:#}"), "additional task failure");
            }
        }

        self.record_end();
        first_error.map_or(Ok(()), Err)
    }

    /// Run a single build of `job` outside the streaming loop.
    ///
    /// Without explicit `inputs`, each input uses the latest version of its
    /// resource and `passed` constraints are ignored. Returns the build number.
    ///
    /// # Errors
    ///
    /// If the job is unknown, an input cannot be resolved, or the build fails.
    pub async fn trigger(
        &self,
        pipeline: &Pipeline,
        job: JobId,
        inputs: Option<Object<ResourceVersion>>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let job = pipeline.job(job).with_context(|| format!("unknown {job}"))?;
        let inputs = match inputs {
            Some(inputs) => inputs,
            None => self.latest_inputs(pipeline, job).await?,
        };
        info!(job = %job.name, "manually triggered build");
        let build = self.next_build();
        self.execute(job, build, inputs, cancel)
            .await
            .with_context(|| format!("build {build} of job {} failed", job.name))?;
        Ok(build)
    }

    async fn latest_inputs(&self, pipeline: &Pipeline, job: &JobConfig) -> Result<Object<ResourceVersion>> {
        let mut inputs = Object::new();
        for input in &job.inputs {
            let resource = pipeline
                .resource_id(input.resource())
                .and_then(|id| pipeline.resource(id))
                .with_context(|| format!("unknown resource {}", input.resource()))?;
            let version = latest_version(resource, self.checker.as_ref()).await?;
            inputs.insert(input.name.clone(), version);
        }
        Ok(inputs)
    }

    fn versions(&self, resource: Arc<ResourceConfig>) -> BoxStream<ResourceVersion> {
        let check_every = self.options.check_every.unwrap_or(resource.check_every);
        let checker = Arc::clone(&self.checker);
        match check_every.interval() {
            Some(interval) => version_stream(resource, checker, None, interval).boxed(),
            None => check_stream(resource, checker, None).boxed(),
        }
    }

    fn input_stream(
        &self,
        plan: &JobPlan,
        resource_feeds: &mut [BroadcastBuilder<ResourceVersion>],
        job_feeds: &mut [BroadcastBuilder<Object<ResourceVersion>>],
        group: &CancellationToken,
    ) -> Result<Option<BoxStream<Object<ResourceVersion>>>> {
        let mut independent = Vec::with_capacity(plan.independent.len());
        for input in &plan.independent {
            let feed = resource_feeds
                .get_mut(input.resource.index())
                .with_context(|| format!("missing {}", input.resource))?;
            independent.push((input.name.clone(), feed.subscribe().boxed()));
        }

        let mut dependent = Vec::with_capacity(plan.dependent.len() + 1);
        for dep in &plan.dependent {
            let feed = job_feeds
                .get_mut(dep.upstream.index())
                .with_context(|| format!("missing {}", dep.upstream))?;
            let bindings = dep.bindings.clone();
            let projected = feed
                .subscribe()
                .filter_map(move |tuple: Object<ResourceVersion>| project(&tuple, &bindings))
                .boxed();
            dependent.push(IntersectInput::new(projected).with_domain(dep.domain()));
        }

        let options = IntersectOptions {
            max_candidates: self.options.max_candidates,
        };
        debug!(job = %plan.name, strategy = %plan.strategy, "wiring job inputs");
        Ok(match plan.strategy {
            InputStrategy::None => None,
            InputStrategy::Aggregate => Some(aggregate(group, independent).boxed()),
            InputStrategy::Intersect => Some(intersect_with(group, dependent, options)),
            InputStrategy::AggregateAndIntersect => {
                let aggregated = aggregate(group, independent).boxed();
                dependent.push(IntersectInput::new(aggregated).with_domain(plan.independent_domain()));
                Some(intersect_with(group, dependent, options))
            }
        })
    }

    async fn job_loop(
        self,
        job: Arc<JobConfig>,
        inputs: Option<BoxStream<Object<ResourceVersion>>>,
        output: Broadcast<Object<ResourceVersion>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Some(mut inputs) = inputs else {
            debug!(job = %job.name, "job has no inputs, only manual triggers will run it");
            output.close();
            return Ok(());
        };
        let mut output = output;

        let result = loop {
            let tuple = match inputs.next(&cancel).await {
                Ok(tuple) => tuple,
                Err(Error::EndOfStream) => {
                    info!(job = %job.name, "inputs exhausted");
                    break Ok(());
                }
                Err(_) if cancel.is_cancelled() => break Ok(()),
                Err(err) => {
                    error!(job = %job.name, error = %err, "failed to get inputs");
                    break Err(anyhow::Error::new(err).context(format!("inputs of job {}", job.name)));
                }
            };

            let build = self.next_build();
            if let Err(err) = self.execute(&job, build, tuple.clone(), &cancel).await {
                warn!(job = %job.name, build, error = %format!("{err:#}"), "build failed");
                continue;
            }
            match output.emit(tuple, &cancel).await {
                Ok(()) => {}
                Err(_) if cancel.is_cancelled() => break Ok(()),
                Err(err) => break Err(anyhow::Error::new(err).context(format!("publishing job {}", job.name))),
            }
        };

        output.close();
        if let Err(err) = inputs.close().await {
            warn!(job = %job.name, error = %err, "closing job inputs");
        }
        result
    }

    async fn resource_loop(
        self,
        resource: Arc<ResourceConfig>,
        mut versions: BoxStream<ResourceVersion>,
        mut output: Broadcast<ResourceVersion>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let result = loop {
            let version = match versions.next(&cancel).await {
                Ok(version) => version,
                Err(Error::EndOfStream) => {
                    debug!(resource = %resource.name, "no further checks");
                    break Ok(());
                }
                Err(_) if cancel.is_cancelled() => break Ok(()),
                Err(err) => {
                    error!(resource = %resource.name, error = %err, "check failed");
                    break Err(anyhow::Error::new(err).context(format!("resource {}", resource.name)));
                }
            };

            info!(resource = %resource.name, version = %version.version, "found version");
            self.count(metrics::VERSIONS_DISCOVERED);
            self.count(&format!("resource.{}.versions", resource.name));
            match output.emit(version, &cancel).await {
                Ok(()) => {}
                Err(_) if cancel.is_cancelled() => break Ok(()),
                Err(err) => break Err(anyhow::Error::new(err).context(format!("publishing resource {}", resource.name))),
            }
        };

        output.close();
        if let Err(err) = versions.close().await {
            warn!(resource = %resource.name, error = %err, "closing version stream");
        }
        result
    }

    async fn execute(
        &self,
        job: &JobConfig,
        build: u64,
        inputs: Object<ResourceVersion>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for (name, input) in &inputs {
            info!(job = %job.name, build, input = %name, version = %input.version, "input");
        }
        let ctx = BuildContext {
            job: job.name.clone(),
            build,
            plan: job.plan.clone(),
            inputs,
            cancel: cancel.clone(),
        };

        self.count(metrics::BUILDS_STARTED);
        let started = Instant::now();
        let result = self.executor.execute(&ctx).await;
        self.record_duration(started);

        match &result {
            Ok(()) => {
                info!(job = %job.name, build, "build succeeded");
                self.count(metrics::BUILDS_SUCCEEDED);
                self.count(&format!("job.{}.succeeded", job.name));
            }
            Err(_) => {
                self.count(metrics::BUILDS_FAILED);
                self.count(&format!("job.{}.failed", job.name));
            }
        }
        result
    }

    fn next_build(&self) -> u64 {
        self.next_build.fetch_add(1, Ordering::Relaxed)
    }

    fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.increment_counter(name, 1);
        }
    }

    fn record_duration(&self, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_value(metrics::BUILD_DURATION_MS, started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    fn record_start(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }
    }

    fn record_end(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_end();
        }
    }
}

/// Rename an upstream tuple's keys to this job's input names.
///
/// Returns `None` unless every binding is satisfied.
fn project(
    tuple: &Object<ResourceVersion>,
    bindings: &[Binding],
) -> Option<Object<ResourceVersion>> {
    bindings
        .iter()
        .map(|b| tuple.get(&b.upstream_input).map(|v| (b.input.clone(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projection_renames_upstream_keys() {
        let tuple: Object<ResourceVersion> = [
            ("source", ResourceVersion::new("repo", json!({"ref": "abc"}))),
            ("other", ResourceVersion::new("tools", json!({"v": 1}))),
        ]
        .into_iter()
        .collect();
        let bindings = vec![Binding {
            input: "repo".into(),
            upstream_input: "source".into(),
        }];

        let projected = project(&tuple, &bindings).unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("repo").unwrap().version, json!({"ref": "abc"}));
    }

    #[test]
    fn projection_requires_every_binding() {
        let tuple: Object<ResourceVersion> =
            [("a", ResourceVersion::new("repo", json!(1)))].into_iter().collect();
        let bindings = vec![Binding {
            input: "b".into(),
            upstream_input: "missing".into(),
        }];
        assert!(project(&tuple, &bindings).is_none());
    }
}
