//! Suites: many source files, several expectations per file.
//!
//! A suite manifest is JSON:
//!
//! ```json
//! {
//!   "analyzer": "infer",
//!   "source_root": ".",
//!   "cases": [
//!     {
//!       "name": "lvalue_conditional",
//!       "file": "cpp/frontend/conditional/lvalue_conditional.cpp",
//!       "expect": [
//!         { "kind": "DIVIDE_BY_ZERO", "procedures": ["div0_choose_lvalue"] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Each case runs the analyzer once and matches every expectation against
//! that single run.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use crate::command::{Frontend, LanguageFlags};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::harness::{flags_for, Harness};
use crate::issue::BugKind;
use crate::matcher::{ExpectedSpec, MatchResult};

/// Expected issues of one kind within a case's file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Expectation {
    pub kind: BugKind,
    #[serde(default)]
    pub procedures: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lines: BTreeMap<String, BTreeSet<u32>>,
}

/// One source file and what the analyzer must report for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteCase {
    pub name: String,
    pub file: PathBuf,
    /// Defaults to a guess from the file extension.
    #[serde(default)]
    pub frontend: Option<Frontend>,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub extra_flags: Vec<String>,
    pub expect: Vec<Expectation>,
}

impl SuiteCase {
    pub fn flags(&self) -> HarnessResult<LanguageFlags> {
        let mut flags = match self.frontend {
            Some(frontend) => LanguageFlags::new(frontend),
            None => flags_for(&self.file)?,
        };
        flags.include_paths = self.include_paths.clone();
        flags.defines = self.defines.clone();
        flags.extra = self.extra_flags.clone();
        Ok(flags)
    }

    pub fn specs(&self) -> Vec<ExpectedSpec> {
        self.expect
            .iter()
            .map(|e| ExpectedSpec {
                kind: e.kind.clone(),
                file: self.file.clone(),
                procedures: e.procedures.clone(),
                lines: e.lines.clone(),
            })
            .collect()
    }
}

/// Suite manifest file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteManifest {
    /// Harness settings, given as top-level keys next to `cases`.
    #[serde(flatten)]
    pub harness: HarnessConfig,
    pub cases: Vec<SuiteCase>,
}

impl SuiteManifest {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            HarnessError::Configuration(format!(
                "cannot read suite manifest {}: {}",
                path.display(),
                err
            ))
        })?;
        let manifest: SuiteManifest = serde_json::from_str(&content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        let mut names = HashSet::new();
        for case in &self.cases {
            if !names.insert(case.name.as_str()) {
                return Err(HarnessError::Configuration(format!(
                    "duplicate case name: {}",
                    case.name
                )));
            }
            if case.expect.is_empty() {
                return Err(HarnessError::Configuration(format!(
                    "case {} has no expectations",
                    case.name
                )));
            }
        }
        Ok(())
    }
}

/// One expectation that did not match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KindMismatch {
    pub kind: BugKind,
    pub result: MatchResult,
}

/// How a case ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    /// The run was clean but at least one expectation did not match.
    Failed { mismatches: Vec<KindMismatch> },
    /// The harness or analyzer broke before matching.
    Errored { error: String },
}

/// Report for one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub file: PathBuf,
    pub outcome: CaseOutcome,
    pub run_id: Option<String>,
    pub digest: Option<String>,
    pub duration_ms: u64,
}

/// Aggregate suite report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    /// Whether every case passed.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }
}

/// Run all `cases`, at most `jobs` at a time. Reports keep manifest order.
pub async fn run_suite(harness: &Harness<'_>, cases: &[SuiteCase], jobs: usize) -> SuiteReport {
    let started_at = Utc::now();
    let start = Instant::now();

    let reports: Vec<CaseReport> = stream::iter(cases)
        .map(|case| run_case(harness, case))
        .buffered(jobs.max(1))
        .collect()
        .await;

    let count = |pred: fn(&CaseOutcome) -> bool| reports.iter().filter(|r| pred(&r.outcome)).count();
    let passed = count(|o| matches!(o, CaseOutcome::Passed));
    let failed = count(|o| matches!(o, CaseOutcome::Failed { .. }));
    let errored = count(|o| matches!(o, CaseOutcome::Errored { .. }));

    info!(passed, failed, errored, "suite finished");

    SuiteReport {
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        passed,
        failed,
        errored,
        cases: reports,
    }
}

/// Run one case: one analyzer run, every expectation matched against it.
pub async fn run_case(harness: &Harness<'_>, case: &SuiteCase) -> CaseReport {
    let start = Instant::now();
    let errored = |error: HarnessError| CaseReport {
        name: case.name.clone(),
        file: case.file.clone(),
        outcome: CaseOutcome::Errored {
            error: error.to_string(),
        },
        run_id: None,
        digest: None,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    let flags = match case.flags() {
        Ok(flags) => flags,
        Err(err) => return errored(err),
    };
    let run = match harness.run(&case.file, &flags).await {
        Ok(run) => run,
        Err(err) => return errored(err),
    };

    let mismatches: Vec<KindMismatch> = case
        .specs()
        .iter()
        .map(|spec| (spec.kind.clone(), harness.evaluate(&run, spec)))
        .filter(|(_, result)| !result.is_match())
        .map(|(kind, result)| KindMismatch { kind, result })
        .collect();

    let outcome = if mismatches.is_empty() {
        CaseOutcome::Passed
    } else {
        CaseOutcome::Failed { mismatches }
    };

    CaseReport {
        name: case.name.clone(),
        file: case.file.clone(),
        outcome,
        run_id: Some(run.run_id),
        digest: Some(run.digest),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
