//! Verdicts and the serialisable grading report.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analyzer::CodeAnalysis;
use crate::core::domain::{
    ExecutionResult, FailureKind, GradeReport, GradingMode, ScoreMethod, SimilarityScore, Verdict,
};

/// Pure function of its inputs: the same pair of results and score always
/// yields the same verdict.
pub fn build_verdict(
    reference: &ExecutionResult,
    submission: &ExecutionResult,
    similarity: &SimilarityScore,
    threshold: f64,
) -> GradeReport {
    if reference.timed_out() || submission.timed_out() {
        let who = if reference.timed_out() {
            "Reference solution"
        } else {
            "Submission"
        };
        return GradeReport {
            verdict: Verdict::Timeout,
            score: 0.0,
            reason: format!("{} exceeded the time limit", who),
            recommendation: "Check for loops that never end and avoid waiting for user input."
                .to_string(),
        };
    }

    if !reference.success {
        return GradeReport {
            verdict: Verdict::Error,
            score: 0.0,
            reason: format!("Reference solution failed: {}", failure_text(reference)),
            recommendation: "The reference solution must run cleanly before submissions can be graded."
                .to_string(),
        };
    }
    if !submission.success {
        return GradeReport {
            verdict: Verdict::Error,
            score: 0.0,
            reason: format!("Submission failed: {}", failure_text(submission)),
            recommendation: "Fix the error reported above and make sure the program runs to the end."
                .to_string(),
        };
    }

    let percent = similarity.value * 100.0;
    if similarity.value >= threshold {
        GradeReport {
            verdict: Verdict::Passed,
            score: similarity.value,
            reason: format!(
                "Similarity {:.2}% meets the {:.2}% threshold",
                percent,
                threshold * 100.0
            ),
            recommendation: "Well done, the drawing matches the expected result.".to_string(),
        }
    } else {
        let recommendation = match similarity.method {
            ScoreMethod::State => {
                "Compare the final position, heading, pen and colours of your drawing with the task."
            }
            ScoreMethod::Image => {
                "Compare your drawing with the expected picture: shape, size, position and colours."
            }
        };
        GradeReport {
            verdict: Verdict::Failed,
            score: similarity.value,
            reason: format!(
                "Similarity {:.2}% is below the {:.2}% threshold",
                percent,
                threshold * 100.0
            ),
            recommendation: recommendation.to_string(),
        }
    }
}

fn failure_text(result: &ExecutionResult) -> String {
    let kind = match result.failure {
        Some(FailureKind::Synthesis) => "code could not be prepared for execution",
        Some(FailureKind::Launch) => "interpreter could not be started",
        Some(FailureKind::Runtime) | None => "runtime error",
        Some(FailureKind::Timeout) => "time limit exceeded",
        Some(FailureKind::MissingState) => "no drawing state was produced",
        Some(FailureKind::OutputLimit) => "output limit exceeded",
    };
    match result.captured.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => format!("{} ({})", kind, last.trim()),
        None => kind.to_string(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SideStatus {
    Success,
    Failed,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SideReport {
    pub execution_status: SideStatus,
    pub execution_time_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub output_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl From<&ExecutionResult> for SideReport {
    fn from(result: &ExecutionResult) -> Self {
        let execution_status = if result.success {
            SideStatus::Success
        } else if result.timed_out() {
            SideStatus::Timeout
        } else {
            SideStatus::Failed
        };
        Self {
            execution_status,
            execution_time_secs: result.elapsed.as_secs_f64(),
            failure: result.failure,
            output_length: result.captured.len(),
            diagnostic: (!result.success && !result.captured.is_empty())
                .then(|| result.captured.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub similarity: f64,
    pub threshold: f64,
    pub threshold_met: bool,
    pub method: ScoreMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssim: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density_ratio: Option<f64>,
}

impl ComparisonReport {
    pub fn new(score: &SimilarityScore, threshold: f64) -> Self {
        Self {
            similarity: score.value,
            threshold,
            threshold_met: score.value >= threshold,
            method: score.method,
            details: score.note.clone(),
            ssim: None,
            density_ratio: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub reference: CodeAnalysis,
    pub submission: CodeAnalysis,
    pub visualization: String,
}

impl AnalysisReport {
    pub fn new(reference: CodeAnalysis, submission: CodeAnalysis) -> Self {
        let visualization = if reference.description == submission.description {
            format!(
                "Both the reference and the submission draw {}.",
                reference.description
            )
        } else {
            format!(
                "The reference draws {} while the submission draws {}.",
                reference.description, submission.description
            )
        };
        Self {
            reference,
            submission,
            visualization,
        }
    }
}

/// Scratch images written in image mode; not part of the score.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ArtifactPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difference: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GradingReport {
    pub run_id: Uuid,
    pub graded_at: DateTime<Utc>,
    pub status: RunStatus,
    pub mode: GradingMode,
    pub reference: SideReport,
    pub submission: SideReport,
    pub comparison: ComparisonReport,
    pub summary: GradeReport,
    pub analysis: AnalysisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactPaths>,
}

impl GradingReport {
    pub fn new(
        mode: GradingMode,
        reference: &ExecutionResult,
        submission: &ExecutionResult,
        comparison: ComparisonReport,
        summary: GradeReport,
        analysis: AnalysisReport,
    ) -> Self {
        let status = match summary.verdict {
            Verdict::Passed | Verdict::Failed => RunStatus::Completed,
            Verdict::Error | Verdict::Timeout => RunStatus::Error,
        };
        Self {
            run_id: Uuid::new_v4(),
            graded_at: Utc::now(),
            status,
            mode,
            reference: reference.into(),
            submission: submission.into(),
            comparison,
            summary,
            analysis,
            artifacts: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.summary.verdict == Verdict::Passed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ok() -> ExecutionResult {
        ExecutionResult::succeeded(Duration::from_millis(40), "Number of turtles: 1")
    }

    fn score(v: f64) -> SimilarityScore {
        SimilarityScore::new(v, ScoreMethod::State)
    }

    #[test]
    fn test_threshold_decides_pass_or_fail() {
        assert_eq!(build_verdict(&ok(), &ok(), &score(0.95), 0.9).verdict, Verdict::Passed);
        assert_eq!(build_verdict(&ok(), &ok(), &score(0.9), 0.9).verdict, Verdict::Passed);
        let failed = build_verdict(&ok(), &ok(), &score(0.5), 0.9);
        assert_eq!(failed.verdict, Verdict::Failed);
        assert_eq!(failed.score, 0.5);
        assert!(failed.reason.contains("50.00%"));
    }

    #[test]
    fn test_failed_side_is_an_error() {
        let broken = ExecutionResult::failed(
            FailureKind::Runtime,
            Duration::from_millis(5),
            "Traceback...\nNameError: name 'x' is not defined",
        );
        let report = build_verdict(&ok(), &broken, &score(1.0), 0.9);
        assert_eq!(report.verdict, Verdict::Error);
        assert!(report.reason.contains("NameError"));
        assert_eq!(build_verdict(&broken, &ok(), &score(1.0), 0.9).verdict, Verdict::Error);
    }

    #[test]
    fn test_timeout_wins_over_other_failures() {
        let slow = ExecutionResult::failed(FailureKind::Timeout, Duration::from_secs(2), "");
        let broken = ExecutionResult::failed(FailureKind::Runtime, Duration::ZERO, "boom");
        let report = build_verdict(&broken, &slow, &score(0.0), 0.9);
        assert_eq!(report.verdict, Verdict::Timeout);
        assert!(report.reason.starts_with("Submission"));
    }

    #[test]
    fn test_report_serialises_expected_fields() {
        let summary = build_verdict(&ok(), &ok(), &score(1.0), 0.9);
        let analysis = AnalysisReport::new(
            crate::analyzer::analyze("import turtle\nfor i in range(4):\n    turtle.forward(100)\n    turtle.left(90)\n"),
            crate::analyzer::analyze("import turtle\nturtle.circle(50)\n"),
        );
        let report = GradingReport::new(
            GradingMode::State,
            &ok(),
            &ok(),
            ComparisonReport::new(&score(1.0), 0.9),
            summary,
            analysis,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["mode"], "state");
        assert_eq!(json["summary"]["verdict"], "PASSED");
        assert_eq!(json["comparison"]["threshold_met"], true);
        assert_eq!(json["reference"]["execution_status"], "success");
        assert!(json["analysis"]["visualization"].as_str().unwrap().contains("while"));
        assert!(json.get("artifacts").is_none());
    }
}
