//! bugcheck - exact-set regression checks for static analyzers
//!
//! ## Commands
//!
//! - `verify`: run the analyzer on one file and compare one kind against an expected set
//! - `parse`: parse a saved analyzer report and print its issues
//! - `suite`: run every case of a JSON suite manifest
//!
//! Exit status: 0 = all expectations matched, 1 = mismatch, 2 = harness or analyzer failure.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

use bugcheck_core::harness::flags_for;
use bugcheck_core::{
    run_suite, BugKind, CaseOutcome, ExpectedSpec, Frontend, Harness, HarnessConfig, Issue,
    LanguageFlags, MatchMode, ReportFormat, ReportSource, ResultsParser, SuiteManifest,
};

#[derive(Parser)]
#[command(name = "bugcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Exact-set regression checks for static analyzers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analyzer on one file and check one bug kind exactly
    Verify {
        /// Source file, relative to the source root
        file: PathBuf,

        /// Bug kind to check (e.g. DIVIDE_BY_ZERO)
        #[arg(short, long)]
        kind: String,

        /// Procedure expected to be flagged (repeatable)
        #[arg(short, long = "procedure")]
        procedures: Vec<String>,

        /// Expected `procedure:line` pair; only checked with --strict-lines
        #[arg(long = "line", value_parser = parse_procedure_line)]
        lines: Vec<(String, u32)>,

        /// Frontend (c, cpp, objc, java); guessed from the extension if omitted
        #[arg(long)]
        frontend: Option<String>,

        /// Include path passed as -I<path> (repeatable)
        #[arg(short = 'I', long = "include")]
        include_paths: Vec<PathBuf>,

        /// Define passed as -D<define> (repeatable)
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,

        #[command(flatten)]
        harness: HarnessArgs,

        /// Extra analyzer flags, after `--`
        #[arg(last = true)]
        extra: Vec<String>,
    },

    /// Parse a saved analyzer report and print its issues as JSON lines
    Parse {
        /// Report file
        report: PathBuf,

        /// Report format: lines, array or auto
        #[arg(long, default_value = "auto", value_parser = parse_report_format)]
        format: ReportFormat,

        /// Only print issues of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Run a suite manifest
    Suite {
        /// Suite manifest (JSON)
        manifest: PathBuf,

        /// Cases to run concurrently
        #[arg(short, long, env = "BUGCHECK_JOBS", default_value_t = 4)]
        jobs: usize,

        /// Write the full suite report as JSON to this path
        #[arg(long)]
        report_json: Option<PathBuf>,

        #[command(flatten)]
        harness: HarnessArgs,
    },
}

/// Harness settings that override the environment and the manifest.
#[derive(Args)]
struct HarnessArgs {
    /// Analyzer binary (path, or name on PATH)
    #[arg(long)]
    analyzer: Option<PathBuf>,

    /// Directory source files are resolved against
    #[arg(long)]
    root: Option<PathBuf>,

    /// Wall-clock limit per analyzer run
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Read issues from this file in the run's results directory instead of stdout
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Report format: lines, array or auto
    #[arg(long, value_parser = parse_report_format)]
    report_format: Option<ReportFormat>,

    /// Exit code that counts as a clean analyzer run (repeatable)
    #[arg(long = "accept-exit-code")]
    accept_exit_codes: Vec<i32>,

    /// Extra environment for the analyzer, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Compare source lines as well as procedures
    #[arg(long)]
    strict_lines: bool,

    /// Keep the temporary workspace for debugging
    #[arg(long)]
    keep_workspace: bool,
}

impl HarnessArgs {
    /// Overlay these flags onto `base`.
    fn apply(self, mut base: HarnessConfig) -> Result<HarnessConfig> {
        if let Some(analyzer) = self.analyzer {
            base.analyzer = analyzer;
        }
        if let Some(root) = self.root {
            base.source_root = root;
        }
        if let Some(secs) = self.timeout_secs {
            base.timeout_secs = secs;
        }
        match (self.report_file, self.report_format) {
            (Some(path), format) => {
                base.report = ReportSource::File {
                    path,
                    format: format.unwrap_or(ReportFormat::JsonArray),
                };
            }
            (None, Some(format)) => base.report = ReportSource::Stdout { format },
            (None, None) => {}
        }
        if !self.accept_exit_codes.is_empty() {
            base.accepted_exit_codes = self.accept_exit_codes;
        }
        base.env.extend(self.env);
        if self.strict_lines {
            base.match_mode = MatchMode::ProceduresAndLines;
        }
        if self.keep_workspace {
            base.keep_workspace = true;
        }
        base.validate()?;
        Ok(base)
    }
}

/// Outcome of a command that ran to completion.
enum Verdict {
    Pass,
    Fail,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    bugcheck_core::init_tracing(cli.json, level);

    match run(cli.command).await {
        Ok(Verdict::Pass) => ExitCode::SUCCESS,
        Ok(Verdict::Fail) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(command: Commands) -> Result<Verdict> {
    match command {
        Commands::Verify {
            file,
            kind,
            procedures,
            lines,
            frontend,
            include_paths,
            defines,
            harness,
            extra,
        } => {
            let config = harness.apply(HarnessConfig::from_env()?)?;
            let flags = LanguageFlags {
                include_paths,
                defines,
                extra,
                ..base_flags(&file, frontend.as_deref())?
            };
            let mut spec = ExpectedSpec::new(kind.as_str(), &file, procedures);
            for (procedure, line) in lines {
                spec = spec.with_line(procedure, line);
            }
            cmd_verify(&config, &flags, &spec).await
        }
        Commands::Parse {
            report,
            format,
            kind,
        } => cmd_parse(&report, format, kind.as_deref()),
        Commands::Suite {
            manifest,
            jobs,
            report_json,
            harness,
        } => cmd_suite(&manifest, jobs, report_json.as_deref(), harness).await,
    }
}

fn base_flags(file: &Path, frontend: Option<&str>) -> Result<LanguageFlags> {
    Ok(match frontend {
        Some(name) => LanguageFlags::new(name.parse::<Frontend>()?),
        None => flags_for(file)?,
    })
}

async fn cmd_verify(config: &HarnessConfig, flags: &LanguageFlags, spec: &ExpectedSpec) -> Result<Verdict> {
    let harness = Harness::new(config).context("Failed to set up harness")?;
    let run = harness
        .run(&spec.file, flags)
        .await
        .with_context(|| format!("Analyzer run on {} failed", spec.file.display()))?;
    let result = harness.evaluate(&run, spec);

    println!("Command: {}", run.invocation);
    println!("Run ID: {}", run.run_id);
    println!("Duration: {}ms (exit code: {})", run.process.duration_ms(), run.process.exit_code);
    println!("Issues reported: {} (digest {})", run.issues.len(), &run.digest[..12]);
    println!();

    if result.is_match() {
        println!("✓ {} in {}: {}", spec.kind, spec.file.display(), result);
        Ok(Verdict::Pass)
    } else {
        println!("✗ {} in {}: {}", spec.kind, spec.file.display(), result);
        Ok(Verdict::Fail)
    }
}

fn cmd_parse(report: &Path, format: ReportFormat, kind: Option<&str>) -> Result<Verdict> {
    let raw = std::fs::read_to_string(report)
        .with_context(|| format!("Failed to read report {}", report.display()))?;
    let issues = ResultsParser::parse(&raw, format)?;
    let kind = kind.map(BugKind::from);

    let selected: Vec<&Issue> = issues
        .iter()
        .filter(|issue| kind.as_ref().map_or(true, |k| &issue.kind == k))
        .collect();
    for issue in &selected {
        println!("{}", serde_json::to_string(issue)?);
    }

    let procedures: BTreeSet<&str> = selected.iter().map(|i| i.procedure.as_str()).collect();
    eprintln!(
        "{} issue(s), {} distinct procedure(s), digest {}",
        selected.len(),
        procedures.len(),
        bugcheck_core::issues_digest(&issues)
    );
    Ok(Verdict::Pass)
}

async fn cmd_suite(
    manifest_path: &Path,
    jobs: usize,
    report_json: Option<&Path>,
    args: HarnessArgs,
) -> Result<Verdict> {
    let manifest = SuiteManifest::load(manifest_path)
        .with_context(|| format!("Failed to load suite {}", manifest_path.display()))?;
    let base = manifest
        .harness
        .clone()
        .with_env_overrides(|key| std::env::var(key).ok())?;
    let config = args.apply(base)?;
    let harness = Harness::new(&config).context("Failed to set up harness")?;

    info!(cases = manifest.cases.len(), jobs, "Starting suite");
    println!("Running {} case(s) with analyzer {}", manifest.cases.len(), config.analyzer.display());
    println!();

    let report = run_suite(&harness, &manifest.cases, jobs).await;

    for case in &report.cases {
        match &case.outcome {
            CaseOutcome::Passed => println!("  ✓ {} ({}ms)", case.name, case.duration_ms),
            CaseOutcome::Failed { mismatches } => {
                println!("  ✗ {} ({}ms)", case.name, case.duration_ms);
                for mismatch in mismatches {
                    println!("      {}: {}", mismatch.kind, mismatch.result);
                }
            }
            CaseOutcome::Errored { error } => {
                println!("  ! {} ({}ms)", case.name, case.duration_ms);
                println!("      {}", error);
            }
        }
    }

    println!();
    println!(
        "Summary: {} passed, {} failed, {} errored ({}ms)",
        report.passed, report.failed, report.errored, report.duration_ms
    );

    if let Some(path) = report_json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write suite report {}", path.display()))?;
    }

    if report.errored > 0 {
        anyhow::bail!("{} case(s) could not be verified", report.errored);
    }
    Ok(if report.success() {
        Verdict::Pass
    } else {
        Verdict::Fail
    })
}

fn parse_report_format(s: &str) -> Result<ReportFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "lines" | "jsonl" | "json_lines" => Ok(ReportFormat::JsonLines),
        "array" | "json" | "json_array" => Ok(ReportFormat::JsonArray),
        "auto" => Ok(ReportFormat::Auto),
        other => Err(format!("unknown report format: {}", other)),
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {}", s))?;
    if key.is_empty() {
        return Err(format!("empty key in {}", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_procedure_line(s: &str) -> Result<(String, u32), String> {
    let (procedure, line) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PROCEDURE:LINE, got {}", s))?;
    let line = line
        .parse()
        .map_err(|_| format!("invalid line number in {}", s))?;
    Ok((procedure.to_string(), line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_verify() {
        let cli = Cli::try_parse_from([
            "bugcheck",
            "verify",
            "cpp/lvalue_conditional.cpp",
            "--kind",
            "DIVIDE_BY_ZERO",
            "-p",
            "div0_choose_lvalue",
            "-p",
            "div0_temp_lvalue",
            "-I",
            "include",
            "--timeout-secs",
            "30",
            "--",
            "-std=c++11",
        ])
        .expect("parse");
        match cli.command {
            Commands::Verify {
                procedures,
                include_paths,
                extra,
                harness,
                ..
            } => {
                assert_eq!(procedures.len(), 2);
                assert_eq!(include_paths, vec![PathBuf::from("include")]);
                assert_eq!(extra, vec!["-std=c++11".to_string()]);
                assert_eq!(harness.timeout_secs, Some(30));
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_harness_args_apply() {
        let cli = Cli::try_parse_from([
            "bugcheck",
            "suite",
            "suite.json",
            "--analyzer",
            "/opt/infer/bin/infer",
            "--report-file",
            "report.json",
            "--accept-exit-code",
            "0",
            "--accept-exit-code",
            "2",
            "--env",
            "INFER_ARGS=--debug",
            "--strict-lines",
        ])
        .expect("parse");
        let Commands::Suite { harness, .. } = cli.command else {
            panic!("expected suite");
        };
        let config = harness.apply(HarnessConfig::default()).expect("apply");
        assert_eq!(config.analyzer, PathBuf::from("/opt/infer/bin/infer"));
        assert_eq!(
            config.report,
            ReportSource::File {
                path: PathBuf::from("report.json"),
                format: ReportFormat::JsonArray,
            }
        );
        assert_eq!(config.accepted_exit_codes, vec![0, 2]);
        assert_eq!(config.env.get("INFER_ARGS").map(String::as_str), Some("--debug"));
        assert_eq!(config.match_mode, MatchMode::ProceduresAndLines);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_report_format("lines"), Ok(ReportFormat::JsonLines));
        assert!(parse_report_format("csv").is_err());
        assert_eq!(
            parse_key_value("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert!(parse_key_value("=x").is_err());
        assert_eq!(
            parse_procedure_line("Foo::bar:42"),
            Ok(("Foo::bar".to_string(), 42))
        );
        assert!(parse_procedure_line("nope").is_err());
    }

    #[test]
    fn test_cmd_parse_reads_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = dir.path().join("report.json");
        std::fs::write(
            &report,
            r#"[{"bug_type":"DIVIDE_BY_ZERO","file":"a.cpp","procedure":"f"}]"#,
        )
        .expect("write");

        let verdict = cmd_parse(&report, ReportFormat::Auto, Some("DIVIDE_BY_ZERO")).expect("parse");
        assert!(matches!(verdict, Verdict::Pass));

        std::fs::write(&report, "not a report").expect("write");
        assert!(cmd_parse(&report, ReportFormat::Auto, None).is_err());
    }
}
