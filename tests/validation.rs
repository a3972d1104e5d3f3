//! Tests for pipeline configuration validation.

use conflux::Pipeline;
use conflux::config::{InputConfig, JobConfig, PipelineConfig, ResourceConfig};
use conflux::testing::{fan_in_pipeline, linear_pipeline};
use conflux::validation::*;

fn codes(config: &PipelineConfig) -> Vec<String> {
    config
        .validate()
        .unwrap_err()
        .into_iter()
        .filter_map(|e| e.code)
        .collect()
}

#[test]
fn test_fixtures_are_valid() {
    assert!(linear_pipeline().validate().is_ok());
    assert!(fan_in_pipeline().validate().is_ok());
}

#[test]
fn test_duplicate_names() {
    let config = PipelineConfig::default()
        .with_resource(ResourceConfig::new("repo", "git"))
        .with_resource(ResourceConfig::new("repo", "git"))
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo")))
        .with_job(JobConfig::new("unit"));
    assert_eq!(codes(&config), vec!["duplicate", "duplicate"]);
}

#[test]
fn test_unknown_references() {
    let config = PipelineConfig::default()
        .with_resource(ResourceConfig::new("repo", "git"))
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("missing")))
        .with_job(JobConfig::new("ship").with_input(InputConfig::new("repo").passed(["nope"])));
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].code.as_deref(), Some("unknown_resource"));
    assert_eq!(errors[0].field.as_deref(), Some("jobs[0].inputs[0].resource"));
    assert_eq!(errors[1].code.as_deref(), Some("unknown_job"));
}

#[test]
fn test_self_dependency() {
    let config = PipelineConfig::default()
        .with_resource(ResourceConfig::new("repo", "git"))
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo").passed(["unit"])));
    assert_eq!(codes(&config), vec!["self_dependency"]);
}

#[test]
fn test_passed_job_must_consume_resource() {
    let config = PipelineConfig::default()
        .with_resource(ResourceConfig::new("repo", "git"))
        .with_resource(ResourceConfig::new("image", "registry-image"))
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo")))
        .with_job(JobConfig::new("ship").with_input(InputConfig::new("image").passed(["unit"])));
    assert_eq!(codes(&config), vec!["resource_not_passed"]);
}

#[test]
fn test_cycles_are_reported_per_job() {
    let config = PipelineConfig::default()
        .with_resource(ResourceConfig::new("repo", "git"))
        .with_job(JobConfig::new("a").with_input(InputConfig::new("repo").passed(["b"])))
        .with_job(JobConfig::new("b").with_input(InputConfig::new("repo").passed(["a"])))
        .with_job(JobConfig::new("c").with_input(InputConfig::new("repo").passed(["a"])));
    let errors = config.validate().unwrap_err();
    let cyclic: Vec<_> = errors
        .iter()
        .filter(|e| e.code.as_deref() == Some("cycle"))
        .map(|e| e.message.clone())
        .collect();
    assert_eq!(cyclic.len(), 2);
    assert!(cyclic[0].contains("'a'"));
    assert!(cyclic[1].contains("'b'"));
}

#[test]
fn test_pipeline_new_reports_every_problem() {
    let config = PipelineConfig::default()
        .with_job(JobConfig::new("unit").with_input(InputConfig::new("repo")))
        .with_job(JobConfig::new(""));
    let err = Pipeline::new(config).unwrap_err();
    let report = err.downcast_ref::<ValidationReport>().unwrap();
    assert_eq!(report.0.len(), 2);
    assert!(err.to_string().starts_with("invalid pipeline:"));
}

#[test]
fn test_validation_error_display() {
    let err = ValidationError::field("jobs[0].name", "must not be empty").with_code("empty");
    assert_eq!(err.to_string(), "[jobs[0].name] must not be empty (code: empty)");
    assert_eq!(ValidationError::new("plain").to_string(), "plain");
}
