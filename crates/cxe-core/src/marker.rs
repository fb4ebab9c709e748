//! The marker protocol -- the wire format between generated harness
//! drivers and the orchestrator's output parser.
//!
//! Each test case emits exactly one line to stdout:
//!
//! ```text
//! TEST_CASE_RESULT: <index><US><actualOutput><US><durationMs><US><errorInfo>
//! ```
//!
//! where `<US>` is the ASCII unit separator (`\u{1F}`). JSON string
//! escaping guarantees the separator cannot appear raw inside
//! `<actualOutput>`, so the four fields are unambiguous even when the
//! output is composite JSON and an error is present. `<errorInfo>` is
//! empty on success, otherwise `<ErrorTypeName>: <message>`.

use thiserror::Error;

use crate::model::{NeverJudged, TestCaseResult};

/// Prefix of every marker line, including the trailing space.
pub const MARKER_PREFIX: &str = "TEST_CASE_RESULT: ";

/// Field separator inside the marker body.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// A parsed marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub index: usize,
    pub actual_output: String,
    pub duration_ms: u64,
    pub error_info: String,
}

/// Error returned for a line that carries the marker prefix but whose
/// body does not parse.
#[derive(Debug, Error)]
pub enum MarkerParseError {
    #[error("marker body has {0} fields, expected 4")]
    FieldCount(usize),
    #[error("invalid test case index {0:?}")]
    Index(String),
    #[error("invalid duration {0:?}")]
    Duration(String),
}

/// Render a marker line. Used by tests and by harness templates as the
/// reference encoding.
pub fn format_marker(index: usize, actual_output: &str, duration_ms: u64, error_info: &str) -> String {
    format!(
        "{MARKER_PREFIX}{index}{sep}{actual_output}{sep}{duration_ms}{sep}{error_info}",
        sep = FIELD_SEPARATOR,
    )
}

/// Parse the body of a marker line (everything after [`MARKER_PREFIX`]).
///
/// Splits into at most 4 fields; any further separators are preserved in
/// the last field. Callers should treat `Err` as a malformed marker: log
/// it and skip the line.
pub fn parse_body(body: &str) -> Result<Marker, MarkerParseError> {
    let fields: Vec<&str> = body.splitn(4, FIELD_SEPARATOR).collect();
    if fields.len() != 4 {
        return Err(MarkerParseError::FieldCount(fields.len()));
    }

    let index: usize = fields[0]
        .trim()
        .parse()
        .map_err(|_| MarkerParseError::Index(fields[0].to_owned()))?;
    let duration_ms: u64 = fields[2]
        .trim()
        .parse()
        .map_err(|_| MarkerParseError::Duration(fields[2].to_owned()))?;

    Ok(Marker {
        index,
        actual_output: fields[1].to_owned(),
        duration_ms,
        error_info: fields[3].to_owned(),
    })
}

impl Marker {
    /// Fold this marker into a [`TestCaseResult`].
    ///
    /// When the output is empty and the error info is non-empty, the error
    /// info is split at the first colon into `errorType` / `error`. When
    /// both output and error are present, the success interpretation wins.
    pub fn into_test_case_result(self) -> TestCaseResult {
        let (actual_output, error, error_type) =
            if self.actual_output.is_empty() && !self.error_info.is_empty() {
                let (error_type, message) = match self.error_info.split_once(':') {
                    Some((t, m)) => (Some(t.trim().to_owned()), m.trim().to_owned()),
                    None => (None, self.error_info.trim().to_owned()),
                };
                (None, Some(message), error_type)
            } else {
                (Some(self.actual_output), None, None)
            };

        TestCaseResult {
            index: self.index,
            passed: NeverJudged,
            actual_output,
            expected_output: NeverJudged,
            execution_time_ms: self.duration_ms,
            memory_bytes: None,
            error,
            error_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse_roundtrip() {
        let line = format_marker(3, "[1,2,3]", 42, "");
        let body = line.strip_prefix(MARKER_PREFIX).unwrap();
        let marker = parse_body(body).unwrap();
        assert_eq!(
            marker,
            Marker {
                index: 3,
                actual_output: "[1,2,3]".to_string(),
                duration_ms: 42,
                error_info: String::new(),
            }
        );
    }

    #[test]
    fn json_output_with_commas_is_unambiguous() {
        // Commas in the JSON body never collide with the field separator.
        let line = format_marker(0, r#"[[2,4],[1,3]]"#, 7, "RuntimeError: boom");
        let body = line.strip_prefix(MARKER_PREFIX).unwrap();
        let marker = parse_body(body).unwrap();
        assert_eq!(marker.actual_output, r#"[[2,4],[1,3]]"#);
        assert_eq!(marker.error_info, "RuntimeError: boom");
    }

    #[test]
    fn extra_separators_stay_in_last_field() {
        let body = format!("1{s}out{s}5{s}Type: a{s}b", s = FIELD_SEPARATOR);
        let marker = parse_body(&body).unwrap();
        assert_eq!(marker.error_info, format!("Type: a{}b", FIELD_SEPARATOR));
    }

    #[test]
    fn too_few_fields_is_an_error() {
        let body = format!("1{s}out{s}5", s = FIELD_SEPARATOR);
        let err = parse_body(&body).unwrap_err();
        assert!(matches!(err, MarkerParseError::FieldCount(3)));
    }

    #[test]
    fn bad_index_is_an_error() {
        let body = format!("x{s}out{s}5{s}", s = FIELD_SEPARATOR);
        assert!(matches!(parse_body(&body), Err(MarkerParseError::Index(_))));
    }

    #[test]
    fn bad_duration_is_an_error() {
        let body = format!("0{s}out{s}fast{s}", s = FIELD_SEPARATOR);
        assert!(matches!(
            parse_body(&body),
            Err(MarkerParseError::Duration(_))
        ));
    }

    #[test]
    fn error_info_splits_at_first_colon() {
        let marker = Marker {
            index: 1,
            actual_output: String::new(),
            duration_ms: 0,
            error_info: "ArithmeticException: / by zero".to_string(),
        };
        let result = marker.into_test_case_result();
        assert_eq!(result.actual_output, None);
        assert_eq!(result.error_type.as_deref(), Some("ArithmeticException"));
        assert_eq!(result.error.as_deref(), Some("/ by zero"));
    }

    #[test]
    fn error_info_without_colon_has_no_type() {
        let marker = Marker {
            index: 0,
            actual_output: String::new(),
            duration_ms: 0,
            error_info: "StackOverflow".to_string(),
        };
        let result = marker.into_test_case_result();
        assert_eq!(result.error_type, None);
        assert_eq!(result.error.as_deref(), Some("StackOverflow"));
    }

    #[test]
    fn success_wins_when_both_output_and_error_present() {
        let marker = Marker {
            index: 2,
            actual_output: "3".to_string(),
            duration_ms: 9,
            error_info: "Warning: noisy".to_string(),
        };
        let result = marker.into_test_case_result();
        assert_eq!(result.actual_output.as_deref(), Some("3"));
        assert_eq!(result.error, None);
        assert_eq!(result.error_type, None);
    }

    #[test]
    fn empty_output_empty_error_is_success_with_empty_output() {
        let marker = Marker {
            index: 0,
            actual_output: String::new(),
            duration_ms: 1,
            error_info: String::new(),
        };
        let result = marker.into_test_case_result();
        assert_eq!(result.actual_output.as_deref(), Some(""));
        assert_eq!(result.error, None);
    }
}
