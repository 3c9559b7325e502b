//! Issue records reported by the analyzer.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Categorical defect type as named in analyzer output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BugKind {
    DivideByZero,
    NullDereference,
    ResourceLeak,
    MemoryLeak,
    RetainCycle,
    UninitializedValue,
    DeadStore,
    PreconditionNotMet,
    /// Any kind the harness has no dedicated variant for.
    Other(String),
}

impl BugKind {
    /// The analyzer's identifier for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            BugKind::DivideByZero => "DIVIDE_BY_ZERO",
            BugKind::NullDereference => "NULL_DEREFERENCE",
            BugKind::ResourceLeak => "RESOURCE_LEAK",
            BugKind::MemoryLeak => "MEMORY_LEAK",
            BugKind::RetainCycle => "RETAIN_CYCLE",
            BugKind::UninitializedValue => "UNINITIALIZED_VALUE",
            BugKind::DeadStore => "DEAD_STORE",
            BugKind::PreconditionNotMet => "PRECONDITION_NOT_MET",
            BugKind::Other(name) => name,
        }
    }
}

impl FromStr for BugKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DIVIDE_BY_ZERO" => BugKind::DivideByZero,
            "NULL_DEREFERENCE" => BugKind::NullDereference,
            "RESOURCE_LEAK" => BugKind::ResourceLeak,
            "MEMORY_LEAK" => BugKind::MemoryLeak,
            "RETAIN_CYCLE" => BugKind::RetainCycle,
            "UNINITIALIZED_VALUE" => BugKind::UninitializedValue,
            "DEAD_STORE" => BugKind::DeadStore,
            "PRECONDITION_NOT_MET" => BugKind::PreconditionNotMet,
            other => BugKind::Other(other.to_string()),
        })
    }
}

impl From<&str> for BugKind {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BugKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BugKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(BugKind::from(raw.as_str()))
    }
}

/// A single defect finding.
///
/// `(kind, file, procedure)` is the identity used for matching; the remaining
/// fields are carried along for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Defect category.
    #[serde(rename = "bug_type", alias = "bug_kind")]
    pub kind: BugKind,

    /// Source file the defect was reported in.
    pub file: PathBuf,

    /// Enclosing procedure identifier.
    pub procedure: String,

    /// Source line, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Source column, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,

    /// Human-readable explanation, if reported.
    #[serde(
        default,
        alias = "message",
        skip_serializing_if = "Option::is_none"
    )]
    pub qualifier: Option<String>,

    /// Analyzer severity label, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl Issue {
    /// Create an issue carrying only the identity fields.
    pub fn new(kind: impl Into<BugKind>, file: impl Into<PathBuf>, procedure: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            file: file.into(),
            procedure: procedure.into(),
            line: None,
            column: None,
            qualifier: None,
            severity: None,
        }
    }

    /// Attach a line number.
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Whether this issue was reported for `kind` in `file`.
    pub fn is_in(&self, kind: &BugKind, file: &Path) -> bool {
        &self.kind == kind && same_file(&self.file, file)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.file.display(), self.procedure)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Compare two report paths, ignoring `./` segments and redundant separators.
pub fn same_file(a: &Path, b: &Path) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(path: &Path) -> Vec<Component<'_>> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// SHA-256 over the ordered identity and position of every issue.
///
/// Two runs with equal digests reported the same multiset in the same order.
pub fn issues_digest(issues: &[Issue]) -> String {
    let mut hasher = Sha256::new();
    for issue in issues {
        hasher.update(issue.kind.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(issue.file.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(issue.procedure.as_bytes());
        hasher.update(b"\0");
        if let Some(line) = issue.line {
            hasher.update(line.to_le_bytes());
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
