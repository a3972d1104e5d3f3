//! Pipeline configuration.
//!
//! A pipeline is described by its resources and jobs and can be loaded from
//! JSON or (with the `toml-config` feature) TOML:
//!
//! ```
//! use conflux::config::{CheckEvery, PipelineConfig};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_json_str(r#"{
//!     "resources": [{ "name": "repo", "type": "git", "check_every": "30s" }],
//!     "jobs": [{ "name": "unit", "inputs": [{ "name": "repo" }] }]
//! }"#)?;
//! assert_eq!(config.resources[0].check_every, CheckEvery::Interval(Duration::from_secs(30)));
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Re-check interval used when a resource does not set `check_every`.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Top-level pipeline description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// An external versioned asset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    /// Resource type, passed through to the checker untouched.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Checker-specific source configuration.
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub check_every: CheckEvery,
}

/// A unit of work triggered by new input tuples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    /// Build plan handed to the executor untouched.
    #[serde(default)]
    pub plan: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Name the version is bound to in the build's inputs.
    pub name: String,
    /// Resource to fetch; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Upstream jobs the version must have passed through.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passed: Vec<String>,
}

impl InputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: None,
            passed: Vec::new(),
        }
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        self.resource.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn from_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn passed<S: Into<String>>(mut self, jobs: impl IntoIterator<Item = S>) -> Self {
        self.passed = jobs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn is_dependent(&self) -> bool {
        !self.passed.is_empty()
    }
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            source: Value::Null,
            check_every: CheckEvery::default(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Value) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_check_every(mut self, check_every: CheckEvery) -> Self {
        self.check_every = check_every;
        self
    }
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            plan: Value::Null,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: InputConfig) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn with_plan(mut self, plan: Value) -> Self {
        self.plan = plan;
        self
    }
}

impl PipelineConfig {
    /// Parse a JSON pipeline description.
    ///
    /// # Errors
    ///
    /// If `input` is not valid JSON or does not match the configuration schema.
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        serde_json::from_str(input).context("parsing JSON pipeline config")
    }

    /// Parse a TOML pipeline description.
    ///
    /// # Errors
    ///
    /// If `input` is not valid TOML or does not match the configuration schema.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("parsing TOML pipeline config")
    }

    /// Load a configuration file; the extension (`json` or `toml`) picks the format.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, has an unsupported extension, or fails to parse.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parsed = match ext.as_deref() {
            Some("json") => Self::from_json_str(&text),
            #[cfg(feature = "toml-config")]
            Some("toml") => Self::from_toml_str(&text),
            other => bail!("unsupported config format {other:?} for {}", path.display()),
        };
        parsed.with_context(|| format!("loading {}", path.display()))
    }

    #[must_use]
    pub fn with_resource(mut self, resource: ResourceConfig) -> Self {
        self.resources.push(resource);
        self
    }

    #[must_use]
    pub fn with_job(mut self, job: JobConfig) -> Self {
        self.jobs.push(job);
        self
    }
}

/// How often a resource is re-checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckEvery {
    /// Check once and stop.
    Never,
    Interval(Duration),
}

impl Default for CheckEvery {
    fn default() -> Self {
        Self::Interval(DEFAULT_CHECK_INTERVAL)
    }
}

impl CheckEvery {
    /// The polling interval, if the resource is polled at all.
    #[must_use]
    pub fn interval(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Interval(d) => Some(d),
        }
    }
}

impl FromStr for CheckEvery {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("never") {
            return Ok(Self::Never);
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .with_context(|| format!("check interval {s:?} is missing a unit"))?;
        let (digits, unit) = s.split_at(split);
        let amount: u64 = digits
            .parse()
            .with_context(|| format!("invalid check interval {s:?}"))?;
        let seconds_per_unit = match unit {
            "ms" => None,
            "s" => Some(1),
            "m" => Some(60),
            "h" => Some(60 * 60),
            _ => bail!("unknown unit {unit:?} in check interval {s:?}"),
        };
        let duration = match seconds_per_unit {
            None => Duration::from_millis(amount),
            Some(per_unit) => amount
                .checked_mul(per_unit)
                .map(Duration::from_secs)
                .with_context(|| format!("check interval {s:?} is too large"))?,
        };
        if duration.is_zero() {
            bail!("check interval must be positive, got {s:?}");
        }
        Ok(Self::Interval(duration))
    }
}

impl TryFrom<String> for CheckEvery {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<CheckEvery> for String {
    fn from(value: CheckEvery) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CheckEvery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::Interval(d) => {
                let ms = d.as_millis();
                if ms % 3_600_000 == 0 {
                    write!(f, "{}h", ms / 3_600_000)
                } else if ms % 60_000 == 0 {
                    write!(f, "{}m", ms / 60_000)
                } else if ms % 1000 == 0 {
                    write!(f, "{}s", ms / 1000)
                } else {
                    write!(f, "{ms}ms")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_intervals() {
        assert_eq!("never".parse::<CheckEvery>().unwrap(), CheckEvery::Never);
        assert_eq!(
            "250ms".parse::<CheckEvery>().unwrap(),
            CheckEvery::Interval(Duration::from_millis(250))
        );
        assert_eq!(
            "2h".parse::<CheckEvery>().unwrap(),
            CheckEvery::Interval(Duration::from_secs(7200))
        );
        assert!("0s".parse::<CheckEvery>().is_err());
        assert!("10".parse::<CheckEvery>().is_err());
        assert!("5d".parse::<CheckEvery>().is_err());
    }

    #[test]
    fn rejects_intervals_that_overflow() {
        let err = "18446744073709551615h".parse::<CheckEvery>().unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!("18446744073709551615m".parse::<CheckEvery>().is_err());
        assert_eq!(
            "18446744073709551615s".parse::<CheckEvery>().unwrap(),
            CheckEvery::Interval(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn displays_in_largest_whole_unit() {
        assert_eq!(CheckEvery::Interval(Duration::from_secs(90)).to_string(), "90s");
        assert_eq!(CheckEvery::default().to_string(), "1m");
        assert_eq!(CheckEvery::Interval(Duration::from_millis(1500)).to_string(), "1500ms");
    }

    #[test]
    fn input_resource_defaults_to_name() {
        let input = InputConfig::new("repo");
        assert_eq!(input.resource(), "repo");
        assert_eq!(input.from_resource("git-repo").resource(), "git-repo");
    }
}
