//! Process-wide harness configuration.
//!
//! A [`HarnessConfig`] is established once before any verification runs and
//! is only ever shared by reference afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};
use crate::matcher::MatchMode;
use crate::parser::ReportFormat;

/// Environment variable naming the analyzer binary.
pub const ENV_ANALYZER: &str = "BUGCHECK_ANALYZER";
/// Environment variable naming the source root.
pub const ENV_SOURCE_ROOT: &str = "BUGCHECK_SOURCE_ROOT";
/// Environment variable holding the default timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "BUGCHECK_TIMEOUT_SECS";
/// Environment variable that preserves the workspace when truthy.
pub const ENV_KEEP_WORKSPACE: &str = "BUGCHECK_KEEP_WORKSPACE";

/// Where the structured report is read from after a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ReportSource {
    /// The analyzer's stdout.
    Stdout { format: ReportFormat },

    /// A file the analyzer writes inside its results directory.
    File { path: PathBuf, format: ReportFormat },
}

impl Default for ReportSource {
    fn default() -> Self {
        ReportSource::Stdout {
            format: ReportFormat::JsonLines,
        }
    }
}

/// Harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Analyzer binary: an explicit path, or a bare name looked up on `PATH`.
    pub analyzer: PathBuf,

    /// Root that source files are resolved against; also the analyzer's cwd.
    pub source_root: PathBuf,

    /// Wall-clock bound for one analyzer run, in seconds.
    pub timeout_secs: u64,

    /// Extra environment for the analyzer process.
    pub env: BTreeMap<String, String>,

    /// Where to read the report from.
    pub report: ReportSource,

    /// Flag that tells the analyzer where to write results, if it takes one.
    pub results_dir_flag: Option<String>,

    /// Exit codes that count as a clean run.
    pub accepted_exit_codes: Vec<i32>,

    /// Identity used when comparing actual against expected issues.
    pub match_mode: MatchMode,

    /// Keep the workspace directory after the harness is dropped.
    pub keep_workspace: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            analyzer: PathBuf::from("infer"),
            source_root: PathBuf::from("."),
            timeout_secs: 300,
            env: BTreeMap::new(),
            report: ReportSource::default(),
            results_dir_flag: Some("--results-dir".to_string()),
            accepted_exit_codes: vec![0],
            match_mode: MatchMode::Procedures,
            keep_workspace: false,
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with the `BUGCHECK_*` environment variables.
    pub fn from_env() -> HarnessResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values produced by `lookup` onto `self`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(analyzer) = lookup(ENV_ANALYZER) {
            self.analyzer = PathBuf::from(analyzer);
        }
        if let Some(root) = lookup(ENV_SOURCE_ROOT) {
            self.source_root = PathBuf::from(root);
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = secs.trim().parse().map_err(|_| {
                HarnessError::Configuration(format!(
                    "{} must be a whole number of seconds, got {:?}",
                    ENV_TIMEOUT_SECS, secs
                ))
            })?;
        }
        if let Some(keep) = lookup(ENV_KEEP_WORKSPACE) {
            self.keep_workspace = is_truthy(&keep);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.analyzer.as_os_str().is_empty() {
            return Err(HarnessError::Configuration(
                "analyzer binary is not set".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(HarnessError::Configuration(
                "timeout must be at least one second".to_string(),
            ));
        }
        if self.accepted_exit_codes.is_empty() {
            return Err(HarnessError::Configuration(
                "at least one accepted exit code is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
