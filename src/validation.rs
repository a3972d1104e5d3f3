//! Structural validation of pipeline configurations.
//!
//! A configuration can deserialize cleanly and still describe a pipeline that
//! cannot run: an input naming a resource that does not exist, a `passed`
//! constraint on an unknown job, or jobs that wait on each other in a cycle.
//! [`Validate`] collects every such problem instead of stopping at the first.
//!
//! # Example
//!
//! ```
//! use conflux::config::{InputConfig, JobConfig, PipelineConfig, ResourceConfig};
//! use conflux::validation::Validate;
//!
//! let config = PipelineConfig::default()
//!     .with_resource(ResourceConfig::new("repo", "git"))
//!     .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo")))
//!     .with_job(JobConfig::new("deploy").with_input(InputConfig::new("repo").passed(["units"])));
//!
//! let errors = config.validate().unwrap_err();
//! assert_eq!(errors[0].code.as_deref(), Some("unknown_job"));
//! ```

use crate::config::{InputConfig, JobConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Result type for validation operations.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Trait for types that can be validated.
pub trait Validate {
    /// Validate this instance and return a list of errors if invalid.
    fn validate(&self) -> ValidationResult;
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Path of the offending field, e.g. `jobs[1].inputs[0].passed`.
    pub field: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Error code for categorization (optional)
    pub code: Option<String>,
}

impl ValidationError {
    /// Create a new validation error with just a message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            field: None,
            message: message.into(),
            code: None,
        }
    }

    /// Create a validation error for a specific field.
    pub fn field<S: Into<String>, M: Into<String>>(field: S, message: M) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
            code: None,
        }
    }

    /// Create a validation error with an error code.
    #[must_use]
    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref field) = self.field {
            write!(f, "[{}] {}", field, self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Every problem found in a configuration, as a single error value.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid pipeline: {}", format_errors(.0))]
pub struct ValidationReport(pub Vec<ValidationError>);

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Combine multiple validation results.
pub fn combine_validations(results: Vec<ValidationResult>) -> ValidationResult {
    let mut all_errors = Vec::new();
    for result in results {
        if let Err(mut errors) = result {
            all_errors.append(&mut errors);
        }
    }
    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors)
    }
}

/// Validation helpers for common patterns.
pub mod validators {
    use super::{ValidationError, ValidationResult};
    use std::collections::BTreeSet;

    /// Validate that a string is not empty.
    pub fn not_empty(field: &str, value: &str) -> ValidationResult {
        if value.trim().is_empty() {
            Err(vec![
                ValidationError::field(field, "must not be empty").with_code("empty"),
            ])
        } else {
            Ok(())
        }
    }

    /// Validate that every name in `names` occurs once.
    pub fn unique<'a>(
        field: &str,
        names: impl IntoIterator<Item = &'a str>,
    ) -> ValidationResult {
        let mut seen = BTreeSet::new();
        let errors: Vec<_> = names
            .into_iter()
            .filter(|name| !seen.insert(*name))
            .map(|name| {
                ValidationError::field(field, format!("duplicate name '{name}'"))
                    .with_code("duplicate")
            })
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> ValidationResult {
        let resources: BTreeSet<&str> = self.resources.iter().map(|r| r.name.as_str()).collect();
        let jobs: BTreeMap<&str, BTreeSet<&str>> = self
            .jobs
            .iter()
            .map(|j| (j.name.as_str(), j.inputs.iter().map(InputConfig::resource).collect()))
            .collect();

        let mut results = vec![
            validators::unique("resources", self.resources.iter().map(|r| r.name.as_str())),
            validators::unique("jobs", self.jobs.iter().map(|j| j.name.as_str())),
        ];
        for (idx, resource) in self.resources.iter().enumerate() {
            results.push(validators::not_empty(&format!("resources[{idx}].name"), &resource.name));
        }
        for (idx, job) in self.jobs.iter().enumerate() {
            results.push(validators::not_empty(&format!("jobs[{idx}].name"), &job.name));
            results.push(validate_job(idx, job, &resources, &jobs));
        }
        results.push(detect_cycles(&self.jobs));
        combine_validations(results)
    }
}

fn validate_job(
    idx: usize,
    job: &JobConfig,
    resources: &BTreeSet<&str>,
    jobs: &BTreeMap<&str, BTreeSet<&str>>,
) -> ValidationResult {
    let mut results = vec![validators::unique(
        &format!("jobs[{idx}].inputs"),
        job.inputs.iter().map(|i| i.name.as_str()),
    )];
    let mut errors = Vec::new();
    for (input_idx, input) in job.inputs.iter().enumerate() {
        let field = format!("jobs[{idx}].inputs[{input_idx}]");
        results.push(validators::not_empty(&format!("{field}.name"), &input.name));
        if !resources.contains(input.resource()) {
            errors.push(
                ValidationError::field(
                    format!("{field}.resource"),
                    format!("unknown resource '{}'", input.resource()),
                )
                .with_code("unknown_resource"),
            );
        }
        for passed in &input.passed {
            if passed == &job.name {
                errors.push(
                    ValidationError::field(
                        format!("{field}.passed"),
                        format!("job '{}' cannot depend on itself", job.name),
                    )
                    .with_code("self_dependency"),
                );
            } else if let Some(consumed) = jobs.get(passed.as_str()) {
                if !consumed.contains(input.resource()) {
                    errors.push(
                        ValidationError::field(
                            format!("{field}.passed"),
                            format!("job '{passed}' does not consume resource '{}'", input.resource()),
                        )
                        .with_code("resource_not_passed"),
                    );
                }
            } else {
                errors.push(
                    ValidationError::field(format!("{field}.passed"), format!("unknown job '{passed}'"))
                        .with_code("unknown_job"),
                );
            }
        }
    }
    results.push(if errors.is_empty() { Ok(()) } else { Err(errors) });
    combine_validations(results)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Report every job that takes part in a `passed` cycle.
fn detect_cycles(jobs: &[JobConfig]) -> ValidationResult {
    let upstream: BTreeMap<&str, BTreeSet<&str>> = jobs
        .iter()
        .map(|job| {
            let deps = job
                .inputs
                .iter()
                .flat_map(|i| i.passed.iter().map(String::as_str))
                .filter(|p| *p != job.name)
                .collect();
            (job.name.as_str(), deps)
        })
        .collect();

    let mut marks = BTreeMap::new();
    let mut cyclic = BTreeSet::new();
    for job in upstream.keys().copied() {
        visit(job, &upstream, &mut marks, &mut Vec::new(), &mut cyclic);
    }

    if cyclic.is_empty() {
        return Ok(());
    }
    Err(cyclic
        .into_iter()
        .map(|job| {
            ValidationError::field("jobs", format!("job '{job}' is part of a passed cycle"))
                .with_code("cycle")
        })
        .collect())
}

fn visit<'a>(
    job: &'a str,
    upstream: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    marks: &mut BTreeMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    cyclic: &mut BTreeSet<&'a str>,
) {
    match marks.get(job) {
        Some(Mark::Done) => return,
        Some(Mark::Visiting) => {
            if let Some(start) = path.iter().position(|j| *j == job) {
                cyclic.extend(path[start..].iter().copied());
            }
            return;
        }
        None => {}
    }
    marks.insert(job, Mark::Visiting);
    path.push(job);
    // unknown jobs are reported elsewhere
    for dep in upstream.get(job).into_iter().flatten().copied() {
        if upstream.contains_key(dep) {
            visit(dep, upstream, marks, path, cyclic);
        }
    }
    path.pop();
    marks.insert(job, Mark::Done);
}
