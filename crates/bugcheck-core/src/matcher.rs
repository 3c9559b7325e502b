//! Exact-set comparison of reported issues against expectations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult};
use crate::issue::{BugKind, Issue};

/// What identifies an issue when comparing actual against expected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Procedure identifier only.
    #[default]
    Procedures,

    /// Procedure identifier and source line.
    ProceduresAndLines,
}

/// Comparison key for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub procedure: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl MatchKey {
    pub fn procedure(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            line: None,
        }
    }

    pub fn at(procedure: impl Into<String>, line: u32) -> Self {
        Self {
            procedure: procedure.into(),
            line: Some(line),
        }
    }

    fn of(issue: &Issue, mode: MatchMode) -> Self {
        match mode {
            MatchMode::Procedures => Self::procedure(&issue.procedure),
            MatchMode::ProceduresAndLines => Self {
                procedure: issue.procedure.clone(),
                line: issue.line,
            },
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.procedure, line),
            None => f.write_str(&self.procedure),
        }
    }
}

/// Expected issues for one (kind, file) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedSpec {
    pub kind: BugKind,
    pub file: PathBuf,
    pub procedures: BTreeSet<String>,

    /// Expected lines per procedure; only consulted in line-strict mode.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lines: BTreeMap<String, BTreeSet<u32>>,
}

impl ExpectedSpec {
    pub fn new<I, S>(kind: impl Into<BugKind>, file: impl Into<PathBuf>, procedures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            file: file.into(),
            procedures: procedures.into_iter().map(Into::into).collect(),
            lines: BTreeMap::new(),
        }
    }

    /// Expect `procedure` to be reported at `line`.
    pub fn with_line(mut self, procedure: impl Into<String>, line: u32) -> Self {
        let procedure = procedure.into();
        self.procedures.insert(procedure.clone());
        self.lines.entry(procedure).or_default().insert(line);
        self
    }

    /// Expected keys under `mode`.
    ///
    /// In line-strict mode a procedure with no recorded lines is expected
    /// with no line at all.
    pub fn keys(&self, mode: MatchMode) -> BTreeSet<MatchKey> {
        match mode {
            MatchMode::Procedures => self
                .procedures
                .iter()
                .map(MatchKey::procedure)
                .collect(),
            MatchMode::ProceduresAndLines => self
                .procedures
                .iter()
                .flat_map(|procedure| match self.lines.get(procedure) {
                    Some(lines) if !lines.is_empty() => lines
                        .iter()
                        .map(|line| MatchKey::at(procedure, *line))
                        .collect::<Vec<_>>(),
                    _ => vec![MatchKey::procedure(procedure)],
                })
                .collect(),
        }
    }
}

/// Difference between expected and actual issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Expected but not reported.
    pub missing: BTreeSet<MatchKey>,

    /// Reported but not expected.
    pub unexpected: BTreeSet<MatchKey>,
}

impl MatchResult {
    /// Whether actual and expected agree exactly.
    pub fn is_match(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    pub fn missing_procedures(&self) -> BTreeSet<&str> {
        self.missing.iter().map(|k| k.procedure.as_str()).collect()
    }

    pub fn unexpected_procedures(&self) -> BTreeSet<&str> {
        self.unexpected.iter().map(|k| k.procedure.as_str()).collect()
    }

    /// `Ok` on an exact match, otherwise a [`HarnessError::MatchFailure`].
    pub fn into_result(self, reason: &str, kind: &BugKind, file: &Path) -> HarnessResult<()> {
        if self.is_match() {
            return Ok(());
        }
        Err(HarnessError::MatchFailure {
            reason: reason.to_string(),
            kind: kind.to_string(),
            file: file.to_path_buf(),
            result: self,
        })
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match() {
            return f.write_str("exact match");
        }
        let join = |set: &BTreeSet<MatchKey>| {
            set.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        };
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("analyzer failed to flag [{}]", join(&self.missing)));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!("analyzer incorrectly flagged [{}]", join(&self.unexpected)));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Exact-set matcher.
pub struct IssueMatcher;

impl IssueMatcher {
    /// Compare the issues reported for `kind` in `file` against `expected`.
    ///
    /// Repeated reports of the same key count once.
    pub fn compare(
        issues: &[Issue],
        kind: &BugKind,
        file: &Path,
        expected: &BTreeSet<MatchKey>,
        mode: MatchMode,
    ) -> MatchResult {
        let actual: BTreeSet<MatchKey> = issues
            .iter()
            .filter(|issue| issue.is_in(kind, file))
            .map(|issue| MatchKey::of(issue, mode))
            .collect();

        MatchResult {
            missing: expected.difference(&actual).cloned().collect(),
            unexpected: actual.difference(expected).cloned().collect(),
        }
    }

    /// Compare against an [`ExpectedSpec`].
    pub fn compare_spec(issues: &[Issue], spec: &ExpectedSpec, mode: MatchMode) -> MatchResult {
        Self::compare(issues, &spec.kind, &spec.file, &spec.keys(mode), mode)
    }
}

/// A predicate with a human-readable explanation of why it failed.
pub trait ResultMatcher<T: ?Sized> {
    fn test(&self, value: &T) -> bool;

    fn describe_mismatch(&self, value: &T) -> String;
}

/// Matches issue sequences containing exactly the expected set for one
/// (kind, file) pair.
#[derive(Debug, Clone)]
pub struct ContainsExactly {
    spec: ExpectedSpec,
    mode: MatchMode,
}

impl ContainsExactly {
    pub fn new(spec: ExpectedSpec) -> Self {
        Self {
            spec,
            mode: MatchMode::Procedures,
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn spec(&self) -> &ExpectedSpec {
        &self.spec
    }

    pub fn evaluate(&self, issues: &[Issue]) -> MatchResult {
        IssueMatcher::compare_spec(issues, &self.spec, self.mode)
    }
}

/// Shorthand for [`ContainsExactly::new`] over an [`ExpectedSpec::new`].
pub fn contains_exactly<I, S>(
    kind: impl Into<BugKind>,
    file: impl Into<PathBuf>,
    procedures: I,
) -> ContainsExactly
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ContainsExactly::new(ExpectedSpec::new(kind, file, procedures))
}

impl ResultMatcher<[Issue]> for ContainsExactly {
    fn test(&self, value: &[Issue]) -> bool {
        self.evaluate(value).is_match()
    }

    fn describe_mismatch(&self, value: &[Issue]) -> String {
        format!(
            "{} in {}: {}",
            self.spec.kind,
            self.spec.file.display(),
            self.evaluate(value)
        )
    }
}

/// Assert that `issues` satisfy `matcher`.
pub fn assert_that(reason: &str, issues: &[Issue], matcher: &ContainsExactly) -> HarnessResult<()> {
    matcher
        .evaluate(issues)
        .into_result(reason, &matcher.spec.kind, &matcher.spec.file)
}
