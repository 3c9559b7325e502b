//! End-to-end verification: build → execute → parse → match.

use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

use crate::command::{CommandBuilder, Frontend, Invocation, LanguageFlags};
use crate::config::{HarnessConfig, ReportSource};
use crate::error::{excerpt, HarnessError, HarnessResult};
use crate::executor::{
    read_report_file, working_dir, CommandExecutor, ExecRequest, ProcessExecutor, ProcessResult,
};
use crate::issue::{issues_digest, BugKind, Issue};
use crate::matcher::{ExpectedSpec, IssueMatcher, MatchResult};
use crate::obs;
use crate::parser::ResultsParser;
use crate::workspace::Workspace;

/// Everything one analyzer run produced.
#[derive(Debug, Clone)]
pub struct AnalyzerRun {
    /// Run identifier; also the name suffix of the run's results directory.
    pub run_id: String,

    /// The exact command that was executed.
    pub invocation: Invocation,

    /// Raw process outcome.
    pub process: ProcessResult,

    /// Parsed issues, in emission order.
    pub issues: Vec<Issue>,

    /// Digest of `issues`; equal digests mean identical sequences.
    pub digest: String,
}

/// Verification harness.
///
/// Holds the shared read-only configuration and the suite workspace. Each
/// call is an independent run; nothing is carried over between calls.
pub struct Harness<'c> {
    config: &'c HarnessConfig,
    workspace: Workspace,
    executor: Arc<dyn CommandExecutor>,
}

impl<'c> Harness<'c> {
    /// Harness that spawns real analyzer processes.
    pub fn new(config: &'c HarnessConfig) -> HarnessResult<Self> {
        Self::with_executor(config, Arc::new(ProcessExecutor))
    }

    /// Harness with a custom executor.
    pub fn with_executor(
        config: &'c HarnessConfig,
        executor: Arc<dyn CommandExecutor>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        let workspace = Workspace::create(config.keep_workspace)?;
        Ok(Self {
            config,
            workspace,
            executor,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Verify that the analyzer reports exactly `procedures` for `kind` in
    /// `source`. The frontend is chosen from the file extension.
    pub async fn verify<I, S>(
        &self,
        source: &Path,
        kind: impl Into<BugKind>,
        procedures: I,
    ) -> HarnessResult<MatchResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = ExpectedSpec::new(kind, source, procedures);
        self.verify_spec(&spec).await
    }

    /// Verify one expectation; the source file is `spec.file`.
    pub async fn verify_spec(&self, spec: &ExpectedSpec) -> HarnessResult<MatchResult> {
        let flags = flags_for(&spec.file)?;
        self.verify_with(&flags, spec).await
    }

    /// Verify one expectation with explicit language flags.
    pub async fn verify_with(
        &self,
        flags: &LanguageFlags,
        spec: &ExpectedSpec,
    ) -> HarnessResult<MatchResult> {
        let run = self.run(&spec.file, flags).await?;
        Ok(self.evaluate(&run, spec))
    }

    /// Like [`Harness::verify_spec`], but a mismatch becomes
    /// [`HarnessError::MatchFailure`].
    pub async fn check(&self, reason: &str, spec: &ExpectedSpec) -> HarnessResult<()> {
        self.verify_spec(spec)
            .await?
            .into_result(reason, &spec.kind, &spec.file)
    }

    /// Compare a finished run against one expectation.
    pub fn evaluate(&self, run: &AnalyzerRun, spec: &ExpectedSpec) -> MatchResult {
        let result = IssueMatcher::compare_spec(&run.issues, spec, self.config.match_mode);
        obs::emit_match_evaluated(
            &run.run_id,
            spec.kind.as_str(),
            result.missing.len(),
            result.unexpected.len(),
        );
        result
    }

    /// Run the analyzer on `source` and parse its report.
    pub async fn run(&self, source: &Path, flags: &LanguageFlags) -> HarnessResult<AnalyzerRun> {
        let run_dir = self.workspace.run_dir()?;
        let run_id = run_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let span = obs::verify_span(&run_id, &source.to_string_lossy());
        let result = self
            .run_in(&run_id, &run_dir, source, flags)
            .instrument(span)
            .await;
        if let Err(err) = &result {
            obs::emit_verify_error(&run_id, err);
        }
        result
    }

    async fn run_in(
        &self,
        run_id: &str,
        run_dir: &Path,
        source: &Path,
        flags: &LanguageFlags,
    ) -> HarnessResult<AnalyzerRun> {
        let root = working_dir(&self.config.source_root)?;
        let invocation = CommandBuilder::new(&self.config.analyzer, &root)
            .results_dir_flag(self.config.results_dir_flag.as_deref())
            .build(source, flags, Some(run_dir))?;
        let command_line = invocation.to_string();

        obs::emit_verify_started(run_id, &command_line);

        let process = self
            .executor
            .execute(ExecRequest {
                invocation: &invocation,
                working_dir: &root,
                env: &self.config.env,
                timeout: self.config.timeout(),
            })
            .await?;

        obs::emit_process_exited(
            run_id,
            process.exit_code,
            process.duration_ms(),
            process.stdout.len(),
        );
        self.check_exit(&command_line, &process)?;

        let (raw, format) = match &self.config.report {
            ReportSource::Stdout { format } => (process.stdout.clone(), *format),
            ReportSource::File { path, format } => {
                (read_report_file(&run_dir.join(path)).await?, *format)
            }
        };
        let issues = ResultsParser::parse(&raw, format)
            .map_err(|err| attach_command(err, &command_line))?;
        let digest = issues_digest(&issues);
        obs::emit_report_parsed(run_id, issues.len(), &digest);

        Ok(AnalyzerRun {
            run_id: run_id.to_string(),
            invocation,
            process,
            issues,
            digest,
        })
    }

    fn check_exit(&self, command_line: &str, process: &ProcessResult) -> HarnessResult<()> {
        let status = match process.signal {
            Some(signal) => format!("killed by signal {}", signal),
            None if self.config.accepted_exit_codes.contains(&process.exit_code) => return Ok(()),
            None => format!("exit code {}", process.exit_code),
        };
        Err(HarnessError::AnalyzerCrash {
            command: command_line.to_string(),
            status,
            stderr_excerpt: excerpt(&process.stderr),
        })
    }
}

/// Default flags for a source file, chosen from its extension.
pub fn flags_for(source: &Path) -> HarnessResult<LanguageFlags> {
    Frontend::from_extension(source)
        .map(LanguageFlags::new)
        .ok_or_else(|| {
            HarnessError::Configuration(format!(
                "cannot infer frontend for {}; pass explicit language flags",
                source.display()
            ))
        })
}

fn attach_command(err: HarnessError, command_line: &str) -> HarnessError {
    match err {
        HarnessError::ResultParse { reason, raw } => HarnessError::ResultParse {
            reason: format!("{} (output of `{}`)", reason, command_line),
            raw,
        },
        other => other,
    }
}
