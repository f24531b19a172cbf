use crate::core::domain::{ExecutionLimits, ExecutionResult, SubmissionCode};

/// Runs one side of a grading request in a separate process.
///
/// Implementations never fail: every problem (synthesis, launch, timeout,
/// runtime error, missing state) is folded into the returned
/// [`ExecutionResult`] so that one side can never abort the other.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    async fn run(
        &self,
        code: &SubmissionCode,
        label: &str,
        limits: &ExecutionLimits,
    ) -> ExecutionResult;
}
