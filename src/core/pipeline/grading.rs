use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    analyzer::analyze,
    compare::{ImageComparison, compare_files, compare_optional_canvases, compare_optional_states},
    config::GraderConfig,
    core::{
        domain::{
            ExecutionResult, GradeReport, GradingMode, SimilarityScore, SubmissionCode, Verdict,
        },
        traits::{
            executor::Executor,
            renderer::{Renderer, Rendering},
        },
    },
    report::{AnalysisReport, ArtifactPaths, ComparisonReport, GradingReport, build_verdict},
};

const REFERENCE_LABEL: &str = "reference";
const SUBMISSION_LABEL: &str = "submission";

/// Runs a reference and a submission side by side and grades the pair.
#[derive(Debug, Clone)]
pub struct Grader {
    executor: Arc<dyn Executor>,
    renderer: Arc<dyn Renderer>,
    config: GraderConfig,
}

impl Grader {
    pub fn new(
        executor: Arc<dyn Executor>,
        renderer: Arc<dyn Renderer>,
        config: GraderConfig,
    ) -> Self {
        Self {
            executor,
            renderer,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(mode = ?self.config.mode))]
    pub async fn grade(
        &self,
        reference: &SubmissionCode,
        submission: &SubmissionCode,
    ) -> GradingReport {
        let analysis = AnalysisReport::new(analyze(&reference.text), analyze(&submission.text));

        if same_code(reference, submission) {
            tracing::info!("reference and submission are identical, skipping execution");
            return self.identical(analysis);
        }

        let report = match self.config.mode {
            GradingMode::State => self.grade_state(reference, submission, analysis).await,
            GradingMode::Image => self.grade_image(reference, submission, analysis).await,
        };
        tracing::info!(
            verdict = ?report.summary.verdict,
            score = report.summary.score,
            "grading finished"
        );
        report
    }

    /// Grades two already rendered PNG drawings without running any code.
    #[tracing::instrument(skip(self))]
    pub fn grade_images(&self, reference: &Path, submission: &Path) -> GradingReport {
        let comparison = compare_files(reference, submission, self.config.weights);
        let threshold = self.config.image_threshold;
        let result = ExecutionResult::succeeded(Duration::ZERO, "");
        let summary = build_verdict(&result, &result, &comparison.score, threshold);

        let mut details = ComparisonReport::new(&comparison.score, threshold);
        if comparison.diff_map.is_some() {
            details.ssim = Some(comparison.ssim);
            details.density_ratio = Some(comparison.density_ratio);
        }
        tracing::info!(verdict = ?summary.verdict, score = summary.score, "image files graded");
        GradingReport::new(
            GradingMode::Image,
            &result,
            &result,
            details,
            summary,
            AnalysisReport::new(analyze(""), analyze("")),
        )
    }

    fn identical(&self, analysis: AnalysisReport) -> GradingReport {
        let threshold = self.config.threshold();
        let result = ExecutionResult::succeeded(Duration::ZERO, "");
        let mut score = SimilarityScore::new(1.0, self.config.mode.method());
        score.note = Some("Identical code".to_string());
        let summary = GradeReport {
            verdict: Verdict::Passed,
            score: 1.0,
            reason: "Identical code".to_string(),
            recommendation: "Well done, the drawing matches the expected result.".to_string(),
        };
        GradingReport::new(
            self.config.mode,
            &result,
            &result,
            ComparisonReport::new(&score, threshold),
            summary,
            analysis,
        )
    }

    async fn grade_state(
        &self,
        reference: &SubmissionCode,
        submission: &SubmissionCode,
        analysis: AnalysisReport,
    ) -> GradingReport {
        let limits = &self.config.limits;
        let (expected, actual) = futures::join!(
            self.executor.run(reference, REFERENCE_LABEL, limits),
            self.executor.run(submission, SUBMISSION_LABEL, limits),
        );

        let score = compare_optional_states(captured_state(&expected), captured_state(&actual));
        let threshold = self.config.threshold();
        let summary = build_verdict(&expected, &actual, &score, threshold);

        GradingReport::new(
            GradingMode::State,
            &expected,
            &actual,
            ComparisonReport::new(&score, threshold),
            summary,
            analysis,
        )
    }

    async fn grade_image(
        &self,
        reference: &SubmissionCode,
        submission: &SubmissionCode,
        analysis: AnalysisReport,
    ) -> GradingReport {
        let limits = &self.config.limits;
        let (expected, actual) = futures::join!(
            self.renderer.render(reference, REFERENCE_LABEL, limits),
            self.renderer.render(submission, SUBMISSION_LABEL, limits),
        );

        let comparison = compare_optional_canvases(
            expected.canvas.as_ref(),
            actual.canvas.as_ref(),
            self.config.weights,
        );
        let threshold = self.config.threshold();
        let summary = build_verdict(&expected.result, &actual.result, &comparison.score, threshold);

        let mut details = ComparisonReport::new(&comparison.score, threshold);
        if comparison.diff_map.is_some() {
            details.ssim = Some(comparison.ssim);
            details.density_ratio = Some(comparison.density_ratio);
        }

        let mut report = GradingReport::new(
            GradingMode::Image,
            &expected.result,
            &actual.result,
            details,
            summary,
            analysis,
        );
        if let Some(dir) = &self.config.artifacts_dir {
            report.artifacts = Some(write_artifacts(dir, &expected, &actual, &comparison));
        }
        report
    }
}

fn same_code(reference: &SubmissionCode, submission: &SubmissionCode) -> bool {
    reference.language == submission.language
        && reference.text.replace("\r\n", "\n").trim() == submission.text.replace("\r\n", "\n").trim()
}

/// The serialized state, only when the side ran to completion.
fn captured_state(result: &ExecutionResult) -> Option<&str> {
    result.success.then_some(result.captured.as_str())
}

/// Writes whichever images exist; failures are logged and leave the path unset.
fn write_artifacts(
    dir: &Path,
    reference: &Rendering,
    submission: &Rendering,
    comparison: &ImageComparison,
) -> ArtifactPaths {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(%e, dir = %dir.display(), "cannot create artifacts directory");
        return ArtifactPaths::default();
    }

    let save_canvas = |rendering: &Rendering, name: &str| -> Option<PathBuf> {
        let canvas = rendering.canvas.as_ref()?;
        let path = dir.join(name);
        match canvas.with_grid().save_png(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(%e, path = %path.display(), "cannot write canvas");
                None
            }
        }
    };

    let difference = comparison.diff_map.as_ref().and_then(|map| {
        let path = dir.join("difference.png");
        match map.save(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(%e, path = %path.display(), "cannot write difference map");
                None
            }
        }
    });

    ArtifactPaths {
        reference: save_canvas(reference, "reference.png"),
        submission: save_canvas(submission, "submission.png"),
        difference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            domain::{CanvasSize, FailureKind, Rgb, ScoreMethod},
            traits::{executor::MockExecutor, renderer::MockRenderer},
        },
        raster::canvas::Canvas,
        stubs::{executor::ExecutorStub, renderer::RendererStub},
    };

    const SQUARE: &str = "import turtle\nt = turtle.Turtle()\nfor _ in range(4):\n    t.forward(100)\n    t.left(90)\n";
    const CIRCLE: &str = "import turtle\nt = turtle.Turtle()\nt.circle(50)\n";

    fn state(x: f64, heading: f64) -> String {
        format!(
            "Number of turtles: 1\nTurtle t:\nPosition: {:.2}, 0.00\nHeading: {:.2}\nPen down: True\n",
            x, heading
        )
    }

    fn unused_renderer() -> Arc<dyn Renderer> {
        let mut renderer = MockRenderer::new();
        renderer.expect_render().never();
        Arc::new(renderer)
    }

    fn unused_executor() -> Arc<dyn Executor> {
        let mut executor = MockExecutor::new();
        executor.expect_run().never();
        Arc::new(executor)
    }

    fn canvas_with_line(from: (f64, f64), to: (f64, f64)) -> Canvas {
        let mut canvas = Canvas::new(CanvasSize { width: 64, height: 64 }, Rgb::WHITE);
        canvas.draw_line(from, to, 3.0, Rgb::BLACK);
        canvas
    }

    #[tokio::test]
    async fn test_identical_code_passes_without_running() {
        let grader = Grader::new(unused_executor(), unused_renderer(), GraderConfig::default());
        let code = SubmissionCode::python(SQUARE);
        let padded = SubmissionCode::python(format!("\n{}\n\n", SQUARE));

        let report = grader.grade(&code, &padded).await;

        assert_eq!(report.summary.verdict, Verdict::Passed);
        assert_eq!(report.summary.score, 1.0);
        assert_eq!(report.summary.reason, "Identical code");
        assert_eq!(report.comparison.similarity, 1.0);
    }

    #[tokio::test]
    async fn test_identical_code_passes_in_image_mode() {
        let config = GraderConfig {
            mode: GradingMode::Image,
            ..GraderConfig::default()
        };
        let grader = Grader::new(unused_executor(), unused_renderer(), config);
        let code = SubmissionCode::python(CIRCLE);

        let report = grader.grade(&code, &code).await;

        assert_eq!(report.summary.verdict, Verdict::Passed);
        assert_eq!(report.comparison.method, ScoreMethod::Image);
    }

    #[tokio::test]
    async fn test_state_mode_compares_captured_states() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .times(2)
            .returning(|_, label, _| match label {
                REFERENCE_LABEL => ExecutionResult::succeeded(Duration::from_millis(30), state(0.0, 90.0)),
                _ => ExecutionResult::succeeded(Duration::from_millis(30), state(0.0, 180.0)),
            });
        let grader = Grader::new(Arc::new(executor), unused_renderer(), GraderConfig::default());

        let report = grader
            .grade(&SubmissionCode::python(SQUARE), &SubmissionCode::python(CIRCLE))
            .await;

        assert!(report.comparison.similarity < 1.0);
        assert!(report.comparison.similarity > 0.8);
        assert_eq!(report.comparison.method, ScoreMethod::State);
        assert_eq!(report.summary.score, report.comparison.similarity);
    }

    #[tokio::test]
    async fn test_failed_submission_is_reported_as_error() {
        let mut executor = MockExecutor::new();
        executor
            .expect_run()
            .times(2)
            .returning(|_, label, _| match label {
                REFERENCE_LABEL => ExecutionResult::succeeded(Duration::from_millis(30), state(0.0, 90.0)),
                _ => ExecutionResult::failed(
                    FailureKind::Runtime,
                    Duration::from_millis(5),
                    "NameError: name 'turtel' is not defined",
                ),
            });
        let grader = Grader::new(Arc::new(executor), unused_renderer(), GraderConfig::default());

        let report = grader
            .grade(&SubmissionCode::python(SQUARE), &SubmissionCode::python(CIRCLE))
            .await;

        assert_eq!(report.summary.verdict, Verdict::Error);
        assert_eq!(report.comparison.similarity, 0.0);
        assert!(report.summary.reason.contains("turtel"));
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_sides_run_concurrently() {
        let delay = Duration::from_millis(300);
        let executor = ExecutorStub::new(
            ExecutionResult::succeeded(Duration::from_millis(300), state(10.0, 0.0)),
            delay,
        );
        let grader = Grader::new(Arc::new(executor), unused_renderer(), GraderConfig::default());

        let started = std::time::Instant::now();
        let report = grader
            .grade(&SubmissionCode::python(SQUARE), &SubmissionCode::python(CIRCLE))
            .await;

        assert!(started.elapsed() < delay * 2);
        assert_eq!(report.summary.verdict, Verdict::Passed);
    }

    #[tokio::test]
    async fn test_timeout_on_either_side_wins() {
        let executor = ExecutorStub::new(
            ExecutionResult::failed(FailureKind::Timeout, Duration::from_secs(1), ""),
            Duration::ZERO,
        );
        let grader = Grader::new(Arc::new(executor), unused_renderer(), GraderConfig::default());

        let report = grader
            .grade(&SubmissionCode::python(SQUARE), &SubmissionCode::python(CIRCLE))
            .await;

        assert_eq!(report.summary.verdict, Verdict::Timeout);
        assert_eq!(report.status, crate::report::RunStatus::Error);
    }

    #[tokio::test]
    async fn test_image_mode_scores_canvases_and_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .times(2)
            .returning(|_, label, _| {
                let canvas = match label {
                    REFERENCE_LABEL => canvas_with_line((8.0, 32.0), (56.0, 32.0)),
                    _ => canvas_with_line((32.0, 8.0), (32.0, 56.0)),
                };
                Rendering {
                    result: ExecutionResult::succeeded(Duration::from_millis(10), ""),
                    canvas: Some(canvas),
                }
            });
        let config = GraderConfig {
            mode: GradingMode::Image,
            artifacts_dir: Some(dir.path().join("out")),
            ..GraderConfig::default()
        };
        let grader = Grader::new(unused_executor(), Arc::new(renderer), config);

        let report = grader
            .grade(&SubmissionCode::python(SQUARE), &SubmissionCode::python(CIRCLE))
            .await;

        assert_eq!(report.summary.verdict, Verdict::Failed);
        assert!(report.comparison.ssim.unwrap() < 1.0);
        assert!(report.comparison.density_ratio.unwrap() > 0.9);
        let artifacts = report.artifacts.unwrap();
        for path in [artifacts.reference, artifacts.submission, artifacts.difference] {
            assert!(path.unwrap().exists());
        }
    }

    #[tokio::test]
    async fn test_image_mode_missing_canvas_scores_zero() {
        let renderer = RendererStub::new(
            Rendering {
                result: ExecutionResult::failed(
                    FailureKind::Runtime,
                    Duration::from_millis(1),
                    "ZeroDivisionError: division by zero",
                ),
                canvas: None,
            },
            Duration::ZERO,
        );
        let config = GraderConfig {
            mode: GradingMode::Image,
            ..GraderConfig::default()
        };
        let grader = Grader::new(unused_executor(), Arc::new(renderer), config);

        let report = grader
            .grade(&SubmissionCode::python(SQUARE), &SubmissionCode::python(CIRCLE))
            .await;

        assert_eq!(report.summary.verdict, Verdict::Error);
        assert_eq!(report.comparison.similarity, 0.0);
        assert!(report.comparison.ssim.is_none());
        assert!(report.artifacts.is_none());
    }

    #[test]
    fn test_png_inputs_are_graded_without_running_code() {
        let dir = tempfile::tempdir().unwrap();
        let horizontal = dir.path().join("horizontal.png");
        let vertical = dir.path().join("vertical.png");
        canvas_with_line((8.0, 32.0), (56.0, 32.0)).save_png(&horizontal).unwrap();
        canvas_with_line((32.0, 8.0), (32.0, 56.0)).save_png(&vertical).unwrap();
        let grader = Grader::new(unused_executor(), unused_renderer(), GraderConfig::default());

        let same = grader.grade_images(&horizontal, &horizontal);
        assert_eq!(same.summary.verdict, Verdict::Passed);
        assert_eq!(same.mode, GradingMode::Image);
        assert_eq!(same.comparison.ssim, Some(1.0));

        let turned = grader.grade_images(&horizontal, &vertical);
        assert_eq!(turned.summary.verdict, Verdict::Failed);
        assert!(turned.comparison.density_ratio.unwrap() > 0.9);

        let missing = grader.grade_images(&horizontal, &dir.path().join("absent.png"));
        assert_eq!(missing.comparison.similarity, 0.0);
        assert!(missing.comparison.ssim.is_none());
    }
}
