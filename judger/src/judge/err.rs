use err_derive::Error;

/// Failures that prevent a submission from receiving a verdict at all.
///
/// Anything the submitted program itself does wrong is a verdict, not an
/// error.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(display = "Unsupported language: {}", _0)]
    UnsupportedLanguage(String),

    #[error(display = "No test cases to judge against")]
    NoTestCases,

    #[error(display = "Failed to provision runtime image: {:#}", _0)]
    Provision(anyhow::Error),

    #[error(display = "Sandbox failure: {:#}", _0)]
    Sandbox(anyhow::Error),

    #[error(display = "Judging was cancelled")]
    Cancelled,
}
