//! Error types for the verification pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::matcher::MatchResult;

/// Maximum number of bytes of raw analyzer output kept in an error message.
pub const EXCERPT_LIMIT: usize = 4096;

/// Errors produced while verifying analyzer output.
///
/// Everything except [`HarnessError::MatchFailure`] means the harness or the
/// analyzer environment is broken, not that the analysis result is wrong.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to spawn `{command}`: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}ms; process tree killed", .timeout.as_millis())]
    ProcessTimeout { command: String, timeout: Duration },

    #[error("`{command}` crashed ({status}); stderr:\n{stderr_excerpt}")]
    AnalyzerCrash {
        command: String,
        status: String,
        stderr_excerpt: String,
    },

    #[error("unparsable analyzer report: {reason}; raw content:\n{}", excerpt(.raw))]
    ResultParse { reason: String, raw: String },

    #[error("{reason}: {kind} in {}: {result}", .file.display())]
    MatchFailure {
        reason: String,
        kind: String,
        file: PathBuf,
        result: MatchResult,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Whether this error indicates a broken environment rather than a
    /// wrong analysis result.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, HarnessError::MatchFailure { .. })
    }

    pub(crate) fn parse(reason: impl Into<String>, raw: &str) -> Self {
        HarnessError::ResultParse {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Truncate `raw` to at most [`EXCERPT_LIMIT`] bytes on a char boundary.
pub fn excerpt(raw: &str) -> String {
    if raw.len() <= EXCERPT_LIMIT {
        return raw.to_string();
    }
    let mut end = EXCERPT_LIMIT;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... ({} more bytes)", &raw[..end], raw.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_passthrough() {
        assert_eq!(excerpt("hello"), "hello");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let raw = "é".repeat(EXCERPT_LIMIT);
        let cut = excerpt(&raw);
        assert!(cut.contains("more bytes"));
        assert!(cut.len() < raw.len());
    }

    #[test]
    fn test_parse_error_keeps_full_raw() {
        let raw = "x".repeat(EXCERPT_LIMIT * 2);
        match HarnessError::parse("bad", &raw) {
            HarnessError::ResultParse { raw: kept, .. } => assert_eq!(kept.len(), raw.len()),
            other => panic!("expected ResultParse, got {:?}", other),
        }
    }

    #[test]
    fn test_infrastructure_classification() {
        let timeout = HarnessError::ProcessTimeout {
            command: "infer".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_infrastructure());

        let failure = HarnessError::MatchFailure {
            reason: "r".into(),
            kind: "DIVIDE_BY_ZERO".into(),
            file: PathBuf::from("a.cpp"),
            result: MatchResult::default(),
        };
        assert!(!failure.is_infrastructure());
    }
}
