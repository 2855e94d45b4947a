//! Judging a submission: running it against every test case and turning the
//! raw run outcomes into a verdict.

mod err;
pub mod model;

use std::{sync::Arc, time::Duration};

pub use err::JudgeError;
pub use model::{ExecutionOutcome, JudgeReport, OutcomeError, TestCase, Verdict};

use crate::{
    lang::LanguageRegistry,
    prelude::{CancelFutureExt, CancellationTokenHandle},
    runner::{
        model::{RunOutcome, SandboxOptions},
        ContainerRuntime, ImageProvisioner, Sandbox,
    },
};

/// Extra stdout room on top of twice the expected output.
const STDOUT_CAP_SLACK: usize = 4096;

/// Judges submissions against test cases.
///
/// A `Judge` holds no per-submission state apart from the image cache, so one
/// instance may judge many submissions concurrently.
pub struct Judge {
    registry: Arc<LanguageRegistry>,
    images: ImageProvisioner,
    sandbox: Sandbox,
}

impl Judge {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<LanguageRegistry>,
        opt: SandboxOptions,
    ) -> Judge {
        Judge {
            registry,
            images: ImageProvisioner::new(runtime.clone()),
            sandbox: Sandbox::new(runtime, opt),
        }
    }

    /// Judge `code` written in `language` against `test_cases`.
    ///
    /// Cases run one at a time in ascending `order`. Judging stops after the
    /// first timeout or runtime error; wrong answers do not stop it. The
    /// returned results are therefore a prefix of the sorted cases.
    #[tracing::instrument(skip(self, code, test_cases, cancel), fields(cases = test_cases.len()))]
    pub async fn judge(
        &self,
        code: &str,
        language: &str,
        test_cases: &[TestCase],
        cancel: &CancellationTokenHandle,
    ) -> Result<JudgeReport, JudgeError> {
        let spec = self.registry.resolve(language)?;
        if test_cases.is_empty() {
            return Err(JudgeError::NoTestCases);
        }

        match self
            .images
            .ensure_available(&spec.image)
            .with_cancel(cancel.cancelled())
            .await
        {
            Some(res) => res.map_err(JudgeError::Provision)?,
            None => return Err(JudgeError::Cancelled),
        }

        let mut cases: Vec<&TestCase> = test_cases.iter().collect();
        cases.sort_by_key(|case| case.order);

        let mut results = Vec::with_capacity(cases.len());
        let mut max_runtime = Duration::ZERO;
        let mut max_memory = 0u64;

        for (idx, case) in cases.into_iter().enumerate() {
            tracing::debug!(case = idx, order = case.order, "Running test case");
            let run = self
                .sandbox
                .run_capped(
                    code,
                    spec,
                    &case.input,
                    self.stdout_cap(case),
                    cancel.get_token(),
                )
                .await
                .map_err(JudgeError::Sandbox)?;

            let (outcome, stop) = match run {
                RunOutcome::Cancelled => return Err(JudgeError::Cancelled),
                RunOutcome::TimedOut { elapsed } => (ExecutionOutcome::timed_out(case, elapsed), true),
                RunOutcome::Completed {
                    stdout,
                    stderr,
                    elapsed,
                    memory,
                } => {
                    // Whitespace-only stderr (a stray newline from a runtime)
                    // does not count as a runtime error.
                    if stderr.trim().is_empty() {
                        let outcome = ExecutionOutcome::compared(case, &stdout, elapsed, memory);
                        (outcome, false)
                    } else {
                        let outcome = ExecutionOutcome::runtime_error(case, &stderr, elapsed, memory);
                        (outcome, true)
                    }
                }
            };

            if let Some(runtime) = outcome.runtime {
                max_runtime = max_runtime.max(runtime);
            }
            if let Some(memory) = outcome.memory {
                max_memory = max_memory.max(memory);
            }
            tracing::debug!(passed = outcome.passed, error = ?outcome.error, "Test case finished");
            results.push(outcome);

            if stop {
                tracing::debug!("Skipping remaining test cases");
                break;
            }
        }

        let status = Verdict::derive(&results);
        tracing::info!(%status, runtime = ?max_runtime, executed = results.len(), "Judged");
        Ok(JudgeReport {
            status,
            runtime: max_runtime,
            memory: max_memory,
            results,
        })
    }

    /// A matching answer must never be cut off, so the stdout cap grows with
    /// the expected output.
    fn stdout_cap(&self, case: &TestCase) -> usize {
        let configured = self.sandbox.options().stdout_size_limit;
        configured.max(case.output.len().saturating_mul(2).saturating_add(STDOUT_CAP_SLACK))
    }
}
