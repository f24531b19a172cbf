use std::time::Duration;

use crate::core::{
    domain::{ExecutionLimits, SubmissionCode},
    traits::renderer::{Renderer, Rendering},
};

/// Answers every render with a fixed rendering after a fixed delay.
#[derive(Debug, Clone)]
pub struct RendererStub {
    rendering: Rendering,
    delay: Duration,
}

impl RendererStub {
    pub fn new(rendering: Rendering, delay: Duration) -> Self {
        Self { rendering, delay }
    }
}

#[async_trait::async_trait]
impl Renderer for RendererStub {
    #[tracing::instrument(skip(self, code))]
    async fn render(
        &self,
        code: &SubmissionCode,
        label: &str,
        limits: &ExecutionLimits,
    ) -> Rendering {
        tracing::debug!("Start rendering: code_len={}, limits={:?}", code.text.len(), limits);
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Rendering result: {:?}", self.rendering.result);

        self.rendering.clone()
    }
}
