use std::time::Duration;

use serde::Serialize;

use crate::constants::{
    DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH, DEFAULT_SETTLE_DELAY_MS, DEFAULT_STDOUT_LIMIT_BYTES,
    DEFAULT_STEP_BUDGET, DEFAULT_TIMEOUT_SECS,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionCode {
    pub text: String,
    pub language: Language,
}

impl SubmissionCode {
    pub fn python(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: Language::Python,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasSize {
    fn default() -> Self {
        CanvasSize {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
        }
    }
}

/// Bounds applied to a single execution of one side.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub settle_delay: Duration,
    pub stdout_limit_bytes: u64,
    pub step_budget: u64,
    pub canvas: CanvasSize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            stdout_limit_bytes: DEFAULT_STDOUT_LIMIT_BYTES,
            step_budget: DEFAULT_STEP_BUDGET,
            canvas: CanvasSize::default(),
        }
    }
}

/// Why one side of a grading run did not produce a comparable result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Synthesis,
    Launch,
    Runtime,
    Timeout,
    MissingState,
    OutputLimit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub elapsed: Duration,
    pub captured: String,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn succeeded(elapsed: Duration, captured: impl Into<String>) -> Self {
        Self {
            success: true,
            elapsed,
            captured: captured.into(),
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, elapsed: Duration, captured: impl Into<String>) -> Self {
        Self {
            success: false,
            elapsed,
            captured: captured.into(),
            failure: Some(kind),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

/// Which signal decides the verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GradingMode {
    /// Serialized drawing state produced by running the code in a child process.
    #[default]
    State,
    /// Rasterised canvases produced by the in-process simulator.
    Image,
}

impl GradingMode {
    pub fn method(self) -> ScoreMethod {
        match self {
            GradingMode::State => ScoreMethod::State,
            GradingMode::Image => ScoreMethod::Image,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMethod {
    State,
    Image,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimilarityScore {
    pub value: f64,
    pub method: ScoreMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SimilarityScore {
    /// Builds a score, clamping into [0, 1]. NaN collapses to 0.
    pub fn new(value: f64, method: ScoreMethod) -> Self {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        Self {
            value,
            method,
            note: None,
        }
    }

    pub fn zero(method: ScoreMethod, note: impl Into<String>) -> Self {
        Self {
            value: 0.0,
            method,
            note: Some(note.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Passed,
    Failed,
    Error,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GradeReport {
    pub verdict: Verdict,
    pub score: f64,
    pub reason: String,
    pub recommendation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_score_is_clamped() {
        assert_eq!(SimilarityScore::new(1.7, ScoreMethod::State).value, 1.0);
        assert_eq!(SimilarityScore::new(-0.2, ScoreMethod::Image).value, 0.0);
        assert_eq!(SimilarityScore::new(f64::NAN, ScoreMethod::Image).value, 0.0);
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(Language::from_tag("Python"), Some(Language::Python));
        assert_eq!(Language::from_tag(" py "), Some(Language::Python));
        assert_eq!(Language::from_tag("cpp"), None);
    }
}
