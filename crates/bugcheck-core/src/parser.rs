//! Parsing analyzer output into [`Issue`] records.
//!
//! Two report shapes are understood:
//!
//! - [`ReportFormat::JsonLines`]: one JSON object per line, interleaved with
//!   free-form noise. Non-JSON lines are skipped. Objects carrying a
//!   `bug_type` (or `bug_kind`) key are issue records; other objects are
//!   structured status lines and prove the stream is in the expected format.
//! - [`ReportFormat::JsonArray`]: a single JSON array of issue records, as in
//!   an analyzer's `report.json`.
//!
//! An empty report is zero issues. A non-empty report that is not in the
//! expected format is an error carrying the raw content; it never silently
//! becomes an empty result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{HarnessError, HarnessResult};
use crate::issue::Issue;

/// Report format version this parser understands.
pub const SUPPORTED_FORMAT_VERSION: u64 = 1;

const KIND_KEYS: [&str; 2] = ["bug_type", "bug_kind"];

/// Shape of a structured report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Newline-delimited JSON records mixed with noise.
    #[default]
    JsonLines,

    /// One JSON array document.
    JsonArray,

    /// `JsonArray` if the document starts with `[`, else `JsonLines`.
    Auto,
}

/// Parses raw analyzer output.
pub struct ResultsParser;

impl ResultsParser {
    /// Parse `raw` in the given format, preserving emission order.
    pub fn parse(raw: &str, format: ReportFormat) -> HarnessResult<Vec<Issue>> {
        let format = match format {
            ReportFormat::Auto if raw.trim_start().starts_with('[') => ReportFormat::JsonArray,
            ReportFormat::Auto => ReportFormat::JsonLines,
            other => other,
        };
        let issues = match format {
            ReportFormat::JsonArray => Self::parse_array(raw)?,
            _ => Self::parse_lines(raw)?,
        };
        debug!(issues = issues.len(), format = ?format, "parsed analyzer report");
        Ok(issues)
    }

    fn parse_lines(raw: &str) -> HarnessResult<Vec<Issue>> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut issues = Vec::new();
        let mut structured_lines = 0usize;

        for (idx, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if !trimmed.starts_with('{') {
                trace!(line = idx + 1, "skipping noise line");
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(value @ Value::Object(_)) => value,
                _ => {
                    trace!(line = idx + 1, "skipping non-JSON line");
                    continue;
                }
            };
            structured_lines += 1;
            check_version(&value, raw)?;

            if is_issue_record(&value) {
                let issue = decode_issue(value).map_err(|err| {
                    HarnessError::parse(format!("malformed issue record on line {}: {}", idx + 1, err), raw)
                })?;
                issues.push(issue);
            }
        }

        if structured_lines == 0 {
            return Err(HarnessError::parse(
                "no structured records found in analyzer output",
                raw,
            ));
        }
        Ok(issues)
    }

    fn parse_array(raw: &str) -> HarnessResult<Vec<Issue>> {
        let document: Value = serde_json::from_str(raw)
            .map_err(|err| HarnessError::parse(format!("report is not valid JSON: {}", err), raw))?;

        let Value::Array(records) = document else {
            return Err(HarnessError::parse("report is not a JSON array", raw));
        };

        records
            .into_iter()
            .enumerate()
            .map(|(idx, record)| {
                check_version(&record, raw)?;
                decode_issue(record).map_err(|err| {
                    HarnessError::parse(format!("malformed issue record at index {}: {}", idx, err), raw)
                })
            })
            .collect()
    }
}

fn is_issue_record(value: &Value) -> bool {
    KIND_KEYS.iter().any(|key| value.get(key).is_some())
}

fn decode_issue(value: Value) -> Result<Issue, serde_json::Error> {
    serde_json::from_value(value)
}

fn check_version(value: &Value, raw: &str) -> HarnessResult<()> {
    match value.get("format_version") {
        None => Ok(()),
        Some(v) if v.as_u64() == Some(SUPPORTED_FORMAT_VERSION) => Ok(()),
        Some(v) => Err(HarnessError::parse(
            format!(
                "unsupported report format version {} (expected {})",
                v, SUPPORTED_FORMAT_VERSION
            ),
            raw,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::BugKind;
    use std::path::PathBuf;

    const FILE: &str = "infer/tests/codetoanalyze/cpp/frontend/conditional/lvalue_conditional.cpp";

    fn record(procedure: &str, line: u32) -> String {
        format!(
            r#"{{"bug_type":"DIVIDE_BY_ZERO","file":"{}","procedure":"{}","line":{}}}"#,
            FILE, procedure, line
        )
    }

    #[test]
    fn test_lines_skip_noise_and_keep_order() {
        let raw = format!(
            "Capturing in make mode...\n{}\nStarting analysis (Infer version v0.5.0)\n{}\n\n{}\n",
            record("div0_choose_lvalue", 10),
            record("div0_choose_rvalue", 16),
            record("div0_choose_lvalue", 10),
        );
        let issues = ResultsParser::parse(&raw, ReportFormat::JsonLines).expect("parse");
        let procs: Vec<_> = issues.iter().map(|i| i.procedure.as_str()).collect();
        assert_eq!(
            procs,
            vec!["div0_choose_lvalue", "div0_choose_rvalue", "div0_choose_lvalue"]
        );
        assert_eq!(issues[1].file, PathBuf::from(FILE));
        assert_eq!(issues[1].line, Some(16));
    }

    #[test]
    fn test_empty_stream_is_zero_issues() {
        assert!(ResultsParser::parse("", ReportFormat::JsonLines)
            .expect("parse")
            .is_empty());
        assert!(ResultsParser::parse("  \n\n", ReportFormat::Auto)
            .expect("parse")
            .is_empty());
    }

    #[test]
    fn test_status_only_stream_is_zero_issues() {
        let raw = "analyzing...\n{\"event\":\"summary\",\"issues\":0}\n";
        let issues = ResultsParser::parse(raw, ReportFormat::JsonLines).expect("parse");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_unrecognized_format_is_error_with_raw() {
        let raw = "bug_type,file,procedure\nDIVIDE_BY_ZERO,a.cpp,f\n";
        match ResultsParser::parse(raw, ReportFormat::JsonLines).unwrap_err() {
            HarnessError::ResultParse { raw: kept, .. } => assert_eq!(kept, raw),
            other => panic!("expected ResultParse, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_format_version_is_error() {
        let raw = format!("{{\"format_version\":2}}\n{}\n", record("f", 1));
        let err = ResultsParser::parse(&raw, ReportFormat::JsonLines).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_record_missing_procedure_is_error() {
        let raw = r#"{"bug_type":"DIVIDE_BY_ZERO","file":"a.cpp"}"#;
        let err = ResultsParser::parse(raw, ReportFormat::JsonLines).unwrap_err();
        assert!(matches!(err, HarnessError::ResultParse { .. }));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_brace_noise_is_skipped() {
        let raw = format!("{{ not json at all\n{}\n", record("f", 3));
        let issues = ResultsParser::parse(&raw, ReportFormat::JsonLines).expect("parse");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_array_report() {
        let raw = format!("[{},\n {}]", record("a", 1), record("b", 2));
        let issues = ResultsParser::parse(&raw, ReportFormat::JsonArray).expect("parse");
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].kind, BugKind::DivideByZero);
        assert_eq!(issues[1].procedure, "b");
    }

    #[test]
    fn test_empty_array_is_zero_issues() {
        let issues = ResultsParser::parse("[]", ReportFormat::JsonArray).expect("parse");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_array_corrupted_is_error() {
        let raw = "[{\"bug_type\":\"DIVIDE_BY_ZERO\",";
        match ResultsParser::parse(raw, ReportFormat::JsonArray).unwrap_err() {
            HarnessError::ResultParse { raw: kept, .. } => assert_eq!(kept, raw),
            other => panic!("expected ResultParse, got {:?}", other),
        }
    }

    #[test]
    fn test_array_wrong_shape_is_error() {
        let err = ResultsParser::parse("{\"issues\":[]}", ReportFormat::JsonArray).unwrap_err();
        assert!(err.to_string().contains("not a JSON array"));
    }

    #[test]
    fn test_auto_detects_array() {
        let raw = format!("  [{}]", record("a", 1));
        let issues = ResultsParser::parse(&raw, ReportFormat::Auto).expect("parse");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let raw = format!("{}\nnoise\n{}\n", record("x", 1), record("y", 2));
        let first = ResultsParser::parse(&raw, ReportFormat::JsonLines).expect("parse");
        let second = ResultsParser::parse(&raw, ReportFormat::JsonLines).expect("parse");
        assert_eq!(first, second);
    }
}
