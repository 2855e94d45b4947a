use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize, Serializer};

use crate::util::serialize::{duration_ms, opt_duration_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseKind {
    Sample,
    #[default]
    Hidden,
}

/// One input and its expected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Cases run in ascending `order`; ties keep their given order.
    #[serde(default)]
    pub order: i64,
    #[serde(default, rename = "type")]
    pub kind: TestCaseKind,
    pub input: String,
    pub output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        TestCase {
            order: 0,
            kind: TestCaseKind::default(),
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

pub const TIME_LIMIT_EXCEEDED: &str = "Time Limit Exceeded";

/// Why a test case did not produce comparable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeError {
    TimeLimitExceeded,
    /// The program wrote this to stderr.
    Runtime(String),
}

impl fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeError::TimeLimitExceeded => f.write_str(TIME_LIMIT_EXCEEDED),
            OutcomeError::Runtime(stderr) => f.write_str(stderr),
        }
    }
}

impl Serialize for OutcomeError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The result of running one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub input: String,
    pub expected_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "opt_duration_ms"
    )]
    pub runtime: Option<Duration>,
    /// Peak memory in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

impl ExecutionOutcome {
    pub fn timed_out(case: &TestCase, elapsed: Duration) -> Self {
        ExecutionOutcome {
            input: case.input.clone(),
            expected_output: case.output.clone(),
            actual_output: None,
            passed: false,
            error: Some(OutcomeError::TimeLimitExceeded),
            runtime: Some(elapsed),
            memory: None,
        }
    }

    pub fn runtime_error(
        case: &TestCase,
        stderr: &str,
        elapsed: Duration,
        memory: Option<u64>,
    ) -> Self {
        ExecutionOutcome {
            input: case.input.clone(),
            expected_output: case.output.clone(),
            actual_output: None,
            passed: false,
            error: Some(OutcomeError::Runtime(stderr.trim().to_owned())),
            runtime: Some(elapsed),
            memory,
        }
    }

    /// A clean exit; passes iff `stdout` matches the expected output.
    pub fn compared(
        case: &TestCase,
        stdout: &str,
        elapsed: Duration,
        memory: Option<u64>,
    ) -> Self {
        ExecutionOutcome {
            input: case.input.clone(),
            expected_output: case.output.clone(),
            passed: outputs_match(stdout, &case.output),
            actual_output: Some(stdout.trim().to_owned()),
            error: None,
            runtime: Some(elapsed),
            memory,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error, Some(OutcomeError::TimeLimitExceeded))
    }
}

/// Outputs are equal after trimming leading and trailing whitespace. Inner
/// whitespace and line endings must match exactly.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    /// Never produced: build and run share one command, so build failures
    /// surface as [`Verdict::RuntimeError`].
    #[serde(rename = "Compilation Error")]
    CompilationError,
}

impl Verdict {
    /// Aggregate per-case outcomes. A timeout anywhere wins, then any other
    /// error, then all-passed; everything else is a wrong answer.
    pub fn derive(outcomes: &[ExecutionOutcome]) -> Verdict {
        if outcomes.iter().any(ExecutionOutcome::is_timeout) {
            Verdict::TimeLimitExceeded
        } else if outcomes.iter().any(|o| o.error.is_some()) {
            Verdict::RuntimeError
        } else if outcomes.iter().all(|o| o.passed) {
            Verdict::Accepted
        } else {
            Verdict::WrongAnswer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => TIME_LIMIT_EXCEEDED,
            Verdict::RuntimeError => "Runtime Error",
            Verdict::CompilationError => "Compilation Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The aggregate result of judging one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeReport {
    pub status: Verdict,
    /// Slowest executed case.
    #[serde(serialize_with = "duration_ms")]
    pub runtime: Duration,
    /// Highest peak memory among executed cases, in bytes. Zero if nothing
    /// was sampled.
    pub memory: u64,
    /// One entry per executed case, in execution order.
    pub results: Vec<ExecutionOutcome>,
}
