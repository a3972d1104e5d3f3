//! Tests for loading pipeline configuration.

use anyhow::Result;
use conflux::config::{CheckEvery, PipelineConfig};
use std::io::Write;
use std::time::Duration;

const JSON: &str = r#"{
    "resources": [
        { "name": "repo", "type": "git", "source": { "uri": "https://example.com/repo.git" } },
        { "name": "image", "type": "registry-image", "check_every": "never" }
    ],
    "jobs": [
        { "name": "unit", "inputs": [{ "name": "repo" }], "plan": [{ "task": "test" }] },
        { "name": "ship", "inputs": [
            { "name": "source", "resource": "repo", "passed": ["unit"] },
            { "name": "image" }
        ] }
    ]
}"#;

#[test]
fn test_json_config_with_defaults() -> Result<()> {
    let config = PipelineConfig::from_json_str(JSON)?;
    assert_eq!(config.resources.len(), 2);
    assert_eq!(config.resources[0].kind, "git");
    assert_eq!(config.resources[0].check_every, CheckEvery::Interval(Duration::from_secs(60)));
    assert_eq!(config.resources[1].check_every, CheckEvery::Never);

    let ship = &config.jobs[1];
    assert_eq!(ship.inputs[0].resource(), "repo");
    assert_eq!(ship.inputs[0].passed, vec!["unit"]);
    assert!(!ship.inputs[1].is_dependent());
    assert!(config.jobs[0].plan.is_array());
    Ok(())
}

#[test]
fn test_invalid_interval_is_rejected() {
    let bad = r#"{ "resources": [{ "name": "r", "type": "t", "check_every": "soon" }] }"#;
    let err = PipelineConfig::from_json_str(bad).unwrap_err();
    assert!(format!("{err:#}").contains("soon"));
}

#[cfg(feature = "toml-config")]
#[test]
fn test_toml_config() -> Result<()> {
    let config = PipelineConfig::from_toml_str(
        r#"
        [[resources]]
        name = "repo"
        type = "git"
        check_every = "30s"

        [[jobs]]
        name = "unit"
        inputs = [{ name = "repo" }]
        "#,
    )?;
    assert_eq!(config.resources[0].check_every, CheckEvery::Interval(Duration::from_secs(30)));
    assert_eq!(config.jobs[0].inputs[0].name, "repo");
    Ok(())
}

#[test]
fn test_from_file_picks_format_by_extension() -> Result<()> {
    let mut json = tempfile::Builder::new().suffix(".json").tempfile()?;
    json.write_all(JSON.as_bytes())?;
    assert_eq!(PipelineConfig::from_file(json.path())?.jobs.len(), 2);

    let mut yaml = tempfile::Builder::new().suffix(".yml").tempfile()?;
    yaml.write_all(b"jobs: []")?;
    assert!(PipelineConfig::from_file(yaml.path()).is_err());
    Ok(())
}

#[test]
fn test_check_every_round_trips_through_json() -> Result<()> {
    let config = PipelineConfig::from_json_str(JSON)?;
    let text = serde_json::to_string(&config)?;
    assert!(text.contains(r#""check_every":"1m""#));
    assert_eq!(PipelineConfig::from_json_str(&text)?, config);
    Ok(())
}
