use std::time::Duration;

use crate::core::{
    domain::{ExecutionLimits, ExecutionResult, SubmissionCode},
    traits::executor::Executor,
};

/// Answers every run with a fixed result after a fixed delay.
#[derive(Debug, Clone)]
pub struct ExecutorStub {
    result: ExecutionResult,
    delay: Duration,
}

impl ExecutorStub {
    pub fn new(result: ExecutionResult, delay: Duration) -> Self {
        Self { result, delay }
    }
}

#[async_trait::async_trait]
impl Executor for ExecutorStub {
    #[tracing::instrument(skip(self, code))]
    async fn run(
        &self,
        code: &SubmissionCode,
        label: &str,
        limits: &ExecutionLimits,
    ) -> ExecutionResult {
        tracing::debug!("Start execution: code_len={}, limits={:?}", code.text.len(), limits);
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Execution result: {:?}", self.result);

        self.result.clone()
    }
}
