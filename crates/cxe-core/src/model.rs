use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a submission, as stored in the status cache.
///
/// Transitions are monotonic over the partial order
/// `QUEUED -> COMPILING -> RUNNING -> {COMPLETED, FAILED}`.
/// `CANCELLED` is reachable only from `QUEUED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Queued,
    Compiling,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubmissionStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Queued, Compiling)
                | (Queued, Cancelled)
                | (Compiling, Running)
                | (Compiling, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Compiling => "COMPILING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl FromStr for SubmissionStatus {
    type Err = SubmissionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "COMPILING" => Ok(Self::Compiling),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(SubmissionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SubmissionStatus`] string.
#[derive(Debug, Clone)]
pub struct SubmissionStatusParseError(pub String);

impl fmt::Display for SubmissionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid submission status: {:?}", self.0)
    }
}

impl std::error::Error for SubmissionStatusParseError {}

// ---------------------------------------------------------------------------

/// Overall classification the orchestrator assigns to one execution.
///
/// The worker maps `Success` to `COMPLETED` and everything else to
/// `FAILED`, carrying the classification in `errorMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    CompilationError,
    RuntimeError,
    Timeout,
    InternalError,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::CompilationError => "COMPILATION_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------

/// Kind of problem being executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    #[default]
    Algorithm,
    DesignClass,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Algorithm => "ALGORITHM",
            Self::DesignClass => "DESIGN_CLASS",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Fixed-null fields
// ---------------------------------------------------------------------------

/// Placeholder for judgment fields (`verdict`, `passed`, `expectedOutput`)
/// that the engine never populates. Serializes as JSON `null` and ignores
/// whatever it is fed on deserialization, so a record written by this
/// engine cannot carry a verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeverJudged;

impl Serialize for NeverJudged {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de> Deserialize<'de> for NeverJudged {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(NeverJudged)
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A declared parameter of the user function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Per-question metadata describing the function the harness must drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetadata {
    /// Package (Java) or namespace/module the solution lives in. May be
    /// empty for the default namespace.
    #[serde(default)]
    pub package_or_namespace: String,
    pub function_name: String,
    pub return_type: String,
    pub parameters: Vec<ParameterSpec>,
    /// Mapping from canonical structure name ("ListNode", "TreeNode",
    /// "GraphNode") to the concrete type name used in the user code.
    #[serde(default)]
    pub custom_data_structures: HashMap<String, String>,
    #[serde(default)]
    pub question_type: QuestionType,
    /// For void-returning problems, the parameter whose post-call state is
    /// the logical output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_strategy: Option<String>,
}

/// One test case: a mapping from parameter name to a JSON value. There is
/// never an expected output here; judging belongs to the submission
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// A request to execute user code against a list of test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    /// Client-supplied id; assigned by the engine when absent. Immutable
    /// and globally unique once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    pub user_id: String,
    pub question_id: String,
    pub language: String,
    pub code: String,
    pub metadata: QuestionMetadata,
    pub test_cases: Vec<TestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Raw outcome of one test case. `passed` and `expectedOutput` are always
/// null in records this engine writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub index: usize,
    #[serde(default)]
    pub passed: NeverJudged,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default)]
    pub expected_output: NeverJudged,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl TestCaseResult {
    /// A gap-filling placeholder for an index the harness never reported
    /// (e.g. the process was killed mid-run).
    pub fn premature(index: usize) -> Self {
        Self {
            index,
            passed: NeverJudged,
            actual_output: None,
            expected_output: NeverJudged,
            execution_time_ms: 0,
            memory_bytes: None,
            error: Some("PrematureTermination".to_string()),
            error_type: None,
        }
    }
}

/// The status record clients poll, keyed by submission id in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub submission_id: String,
    pub status: SubmissionStatus,
    /// Always null: judging is not this engine's job.
    #[serde(default)]
    pub verdict: NeverJudged,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_kb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilation_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub test_case_results: Vec<TestCaseResult>,
    /// Recomputed from the live queue on read; never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl StatusRecord {
    /// Fresh record for a just-enqueued submission.
    pub fn queued(submission_id: impl Into<String>, queued_at: DateTime<Utc>) -> Self {
        Self {
            submission_id: submission_id.into(),
            status: SubmissionStatus::Queued,
            verdict: NeverJudged,
            runtime_ms: None,
            memory_kb: None,
            compilation_output: None,
            error_message: None,
            test_case_results: Vec::new(),
            queue_position: None,
            queued_at,
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }
}

/// What the orchestrator returns for one submission. Internal to the
/// pipeline; the worker folds it into the cached [`StatusRecord`].
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub compilation_output: Option<String>,
    pub test_case_results: Vec<TestCaseResult>,
    /// Wall-clock of the RUN phase.
    pub runtime_ms: Option<u64>,
    pub peak_memory_bytes: Option<u64>,
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
