//! Structured lifecycle events for verification runs.
//!
//! - [`verify_span`] tags every log line of one run with its run id and source.
//! - `emit_*` functions log the key steps at `info!`/`warn!` level.

use tracing::{info, warn, Span};

use crate::error::HarnessError;

/// Span covering one verification run.
///
/// Attach it with `tracing::Instrument` rather than entering it, since the
/// run spans `.await` points.
pub fn verify_span(run_id: &str, source: &str) -> Span {
    tracing::info_span!("bugcheck.verify", run_id = %run_id, source = %source)
}

/// The analyzer is about to be spawned.
pub fn emit_verify_started(run_id: &str, command: &str) {
    info!(event = "verify.started", run_id = %run_id, command = %command);
}

/// The analyzer exited on its own.
pub fn emit_process_exited(run_id: &str, exit_code: i32, duration_ms: u64, stdout_bytes: usize) {
    info!(
        event = "verify.process_exited",
        run_id = %run_id,
        exit_code = exit_code,
        duration_ms = duration_ms,
        stdout_bytes = stdout_bytes,
    );
}

/// The report was parsed.
pub fn emit_report_parsed(run_id: &str, issues: usize, digest: &str) {
    info!(event = "verify.report_parsed", run_id = %run_id, issues = issues, digest = %digest);
}

/// One expectation was matched against the report.
pub fn emit_match_evaluated(run_id: &str, kind: &str, missing: usize, unexpected: usize) {
    info!(
        event = "verify.match_evaluated",
        run_id = %run_id,
        kind = %kind,
        missing = missing,
        unexpected = unexpected,
        passed = missing == 0 && unexpected == 0,
    );
}

/// The run failed before a match could be evaluated.
pub fn emit_verify_error(run_id: &str, error: &HarnessError) {
    warn!(
        event = "verify.error",
        run_id = %run_id,
        infrastructure = error.is_infrastructure(),
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let _guard = verify_span("run-1", "a.cpp").entered();
        emit_verify_started("run-1", "infer --frontend=clang++ a.cpp");
        emit_process_exited("run-1", 0, 12, 100);
        emit_report_parsed("run-1", 4, "abc");
        emit_match_evaluated("run-1", "DIVIDE_BY_ZERO", 0, 0);
        emit_verify_error("run-1", &HarnessError::Configuration("missing".into()));
    }
}
