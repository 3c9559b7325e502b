//! bugcheck - exact-set regression checks for static analyzers
//!
//! Runs an external analyzer on a fixed source file and asserts that the set
//! of defects it reports is exactly the expected set:
//! - Builds a deterministic analyzer command line
//! - Executes it under a wall-clock bound, killing the whole process tree on timeout
//! - Parses the structured report out of noisy output
//! - Compares actual against expected, reporting both missing and unexpected issues

pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod harness;
pub mod issue;
pub mod matcher;
pub mod obs;
pub mod parser;
pub mod suite;
pub mod telemetry;
pub mod workspace;

// Re-export key types
pub use command::{CommandBuilder, Frontend, Invocation, LanguageFlags};
pub use config::{HarnessConfig, ReportSource};
pub use error::{HarnessError, HarnessResult};
pub use executor::{CommandExecutor, ExecRequest, ProcessExecutor, ProcessResult};
pub use harness::{AnalyzerRun, Harness};
pub use issue::{issues_digest, BugKind, Issue};
pub use matcher::{
    assert_that, contains_exactly, ContainsExactly, ExpectedSpec, IssueMatcher, MatchKey,
    MatchMode, MatchResult, ResultMatcher,
};
pub use parser::{ReportFormat, ResultsParser};
pub use suite::{run_suite, CaseOutcome, CaseReport, SuiteCase, SuiteManifest, SuiteReport};
pub use telemetry::init_tracing;
pub use workspace::Workspace;

/// bugcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
