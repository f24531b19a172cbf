use crate::core::domain::{ExecutionLimits, ExecutionResult, SubmissionCode};
use crate::raster::canvas::Canvas;

#[derive(Clone, Debug)]
pub struct Rendering {
    pub result: ExecutionResult,
    /// Final canvas; `None` when the run did not complete.
    pub canvas: Option<Canvas>,
}

/// Draws one side of a grading request onto a pixel canvas.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Renderer: std::fmt::Debug + Send + Sync {
    async fn render(
        &self,
        code: &SubmissionCode,
        label: &str,
        limits: &ExecutionLimits,
    ) -> Rendering;
}
