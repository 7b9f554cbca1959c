//! Analysis pass configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest failure list a report may keep
const MAX_REPORTED_FAILURES_LIMIT: usize = 1_000_000;

/// What the pass does with a record it cannot score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the record, count it in the report and continue
    #[default]
    Skip,
    /// Abort the pass on the first failure
    FailFast,
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "skip" => Ok(FailurePolicy::Skip),
            "fail_fast" => Ok(FailurePolicy::FailFast),
            _ => anyhow::bail!("Invalid failure policy: {}", s),
        }
    }
}

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Failure handling for undecodable or unscorable records
    pub failure_policy: FailurePolicy,

    /// Failure diagnostics kept in the pass report; counts are always complete
    pub max_reported_failures: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            failure_policy: std::env::var("OPMETER_FAILURE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            max_reported_failures: std::env::var("OPMETER_MAX_REPORTED_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

impl AnalyzerConfig {
    /// Parse a TOML document. Missing keys fall back to the defaults.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse analyzer config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_reported_failures > MAX_REPORTED_FAILURES_LIMIT {
            anyhow::bail!(
                "max_reported_failures too high (max {})",
                MAX_REPORTED_FAILURES_LIMIT
            );
        }
        Ok(())
    }
}
