//! Input wiring planner.
//!
//! The planner decides, for every job, where its input tuples come from:
//!
//! 1. **Independent inputs** -- inputs without `passed` constraints subscribe
//!    straight to their resource and are aggregated by input name.
//! 2. **Dependent inputs** -- inputs with `passed` constraints subscribe to the
//!    output of each upstream job. Subscriptions are deduplicated per upstream
//!    job, and every upstream tuple is projected onto this job's input names by
//!    matching resources.
//! 3. **Strategy** -- independent-only jobs aggregate, dependent-only jobs
//!    intersect, mixed jobs intersect the dependent streams with the aggregate.
//!
//! Each stream fed to an intersection is annotated with its key domain (the
//! input names it can produce) so that streams only need to corroborate the
//! keys they actually know about.

use crate::ids::{JobId, ResourceId};
use crate::pipeline::Pipeline;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// How a job's input tuples are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStrategy {
    /// The job has no inputs and only runs when triggered.
    None,
    /// Aggregate independent resource subscriptions.
    Aggregate,
    /// Intersect upstream job outputs.
    Intersect,
    /// Intersect upstream job outputs together with the aggregate of the
    /// independent inputs.
    AggregateAndIntersect,
}

impl Display for InputStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(match self {
            Self::None => "none",
            Self::Aggregate => "aggregate",
            Self::Intersect => "intersect",
            Self::AggregateAndIntersect => "aggregate+intersect",
        })
    }
}

/// An input fed directly by a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndependentInput {
    pub name: String,
    pub resource: ResourceId,
}

/// Maps one key of an upstream job's tuples onto one of this job's inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Input name in this job.
    pub input: String,
    /// Input name in the upstream job carrying the same resource.
    pub upstream_input: String,
}

/// One subscription to an upstream job's successful tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentInput {
    pub upstream: JobId,
    pub bindings: Vec<Binding>,
}

impl DependentInput {
    /// This job's input names produced by the projection.
    pub fn domain(&self) -> BTreeSet<String> {
        self.bindings.iter().map(|b| b.input.clone()).collect()
    }
}

/// Wiring for a single job.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job: JobId,
    pub name: String,
    pub independent: Vec<IndependentInput>,
    pub dependent: Vec<DependentInput>,
    pub strategy: InputStrategy,
}

impl JobPlan {
    /// Input names produced by the aggregated independent inputs.
    pub fn independent_domain(&self) -> BTreeSet<String> {
        self.independent.iter().map(|i| i.name.clone()).collect()
    }
}

/// A finalized wiring plan for every job of a pipeline.
#[derive(Debug, Clone)]
pub struct Plan {
    /// One entry per job, in job id order.
    pub jobs: Vec<JobPlan>,
    resource_subscribers: BTreeMap<ResourceId, usize>,
    job_subscribers: BTreeMap<JobId, usize>,
}

impl Plan {
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<&JobPlan> {
        self.jobs.get(id.index())
    }

    /// Number of jobs subscribing to `resource`.
    #[must_use]
    pub fn resource_subscribers(&self, resource: ResourceId) -> usize {
        self.resource_subscribers.get(&resource).copied().unwrap_or(0)
    }

    /// Number of jobs subscribing to the successful builds of `job`.
    #[must_use]
    pub fn job_subscribers(&self, job: JobId) -> usize {
        self.job_subscribers.get(&job).copied().unwrap_or(0)
    }

    /// Produce a human-readable description of the wiring.
    #[must_use]
    pub fn explain(&self, pipeline: &Pipeline) -> PlanExplanation {
        let name_of = |id: JobId| pipeline.job(id).map_or_else(|| id.to_string(), |j| j.name.clone());
        let resource_of =
            |id: ResourceId| pipeline.resource(id).map_or_else(|| id.to_string(), |r| r.name.clone());

        let jobs = self
            .jobs
            .iter()
            .map(|plan| {
                let mut sources = Vec::new();
                for input in &plan.independent {
                    sources.push(format!("{} <- resource {}", input.name, resource_of(input.resource)));
                }
                for dep in &plan.dependent {
                    let keys = dep
                        .bindings
                        .iter()
                        .map(|b| {
                            if b.input == b.upstream_input {
                                b.input.clone()
                            } else {
                                format!("{} as {}", b.upstream_input, b.input)
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    sources.push(format!("[{keys}] <- job {}", name_of(dep.upstream)));
                }
                ExplainJob {
                    name: plan.name.clone(),
                    strategy: plan.strategy,
                    sources,
                    downstream: self.job_subscribers(plan.job),
                }
            })
            .collect();

        PlanExplanation {
            resources: pipeline
                .resource_ids()
                .map(|id| (resource_of(id), self.resource_subscribers(id)))
                .collect(),
            jobs,
        }
    }
}

/// A job line in a [`PlanExplanation`].
#[derive(Debug, Clone)]
pub struct ExplainJob {
    pub name: String,
    pub strategy: InputStrategy,
    pub sources: Vec<String>,
    /// Number of jobs consuming this job's successful builds.
    pub downstream: usize,
}

/// Rendered view of a [`Plan`].
#[derive(Debug, Clone)]
pub struct PlanExplanation {
    /// Resource name and subscriber count.
    pub resources: Vec<(String, usize)>,
    pub jobs: Vec<ExplainJob>,
}

impl Display for PlanExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(f, "╔═══════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║                    PIPELINE WIRING PLAN                       ║")?;
        writeln!(f, "╚═══════════════════════════════════════════════════════════════╝")?;
        writeln!(f)?;

        writeln!(f, "┌─ RESOURCES ──────────────────────────────────────────────────┐")?;
        for (name, subscribers) in &self.resources {
            writeln!(f, "│ {name:<30} {subscribers:>3} subscriber(s)")?;
        }
        writeln!(f, "└──────────────────────────────────────────────────────────────┘")?;
        writeln!(f)?;

        writeln!(f, "┌─ JOBS ───────────────────────────────────────────────────────┐")?;
        for (idx, job) in self.jobs.iter().enumerate() {
            writeln!(f, "│ {}. {} [{}]", idx + 1, job.name, job.strategy)?;
            for source in &job.sources {
                writeln!(f, "│      {source}")?;
            }
            if job.downstream > 0 {
                writeln!(f, "│      -> {} downstream job(s)", job.downstream)?;
            }
        }
        writeln!(f, "└──────────────────────────────────────────────────────────────┘")?;
        Ok(())
    }
}

/// Plan the input wiring of every job in `pipeline`.
///
/// # Errors
///
/// If a job refers to a resource or job the pipeline does not contain. A
/// pipeline built with [`Pipeline::new`] has been validated against this.
pub fn build_plan(pipeline: &Pipeline) -> Result<Plan> {
    let mut resource_subscribers = BTreeMap::new();
    let mut job_subscribers = BTreeMap::new();
    let mut jobs = Vec::with_capacity(pipeline.job_count());

    for id in pipeline.job_ids() {
        let job = pipeline.job(id).with_context(|| format!("missing {id}"))?;
        let mut independent = Vec::new();
        let mut dependent: BTreeMap<JobId, Vec<Binding>> = BTreeMap::new();

        for input in &job.inputs {
            if !input.is_dependent() {
                let resource = pipeline
                    .resource_id(input.resource())
                    .with_context(|| format!("job {} input {}: unknown resource", job.name, input.name))?;
                *resource_subscribers.entry(resource).or_insert(0) += 1;
                independent.push(IndependentInput {
                    name: input.name.clone(),
                    resource,
                });
                continue;
            }
            for passed in &input.passed {
                let upstream = pipeline
                    .job_id(passed)
                    .with_context(|| format!("job {} input {}: unknown job {passed}", job.name, input.name))?;
                let upstream_input = pipeline
                    .job(upstream)
                    .and_then(|up| up.inputs.iter().find(|i| i.resource() == input.resource()))
                    .with_context(|| {
                        format!("job {passed} does not consume resource {}", input.resource())
                    })?;
                dependent.entry(upstream).or_default().push(Binding {
                    input: input.name.clone(),
                    upstream_input: upstream_input.name.clone(),
                });
            }
        }

        for upstream in dependent.keys() {
            *job_subscribers.entry(*upstream).or_insert(0) += 1;
        }
        let strategy = match (independent.is_empty(), dependent.is_empty()) {
            (true, true) => InputStrategy::None,
            (false, true) => InputStrategy::Aggregate,
            (true, false) => InputStrategy::Intersect,
            (false, false) => InputStrategy::AggregateAndIntersect,
        };

        jobs.push(JobPlan {
            job: id,
            name: job.name.clone(),
            independent,
            dependent: dependent
                .into_iter()
                .map(|(upstream, bindings)| DependentInput { upstream, bindings })
                .collect(),
            strategy,
        });
    }

    Ok(Plan {
        jobs,
        resource_subscribers,
        job_subscribers,
    })
}
