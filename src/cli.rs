//! Command line surface: flags, input loading and config assembly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use crate::config::GraderConfig;
use crate::core::domain::{CanvasSize, GradingMode, Language, SubmissionCode};

const CODE_FIELD: &str = "defaultcode";

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: `defaultcode` has no code for a supported language (found: {found})", .path.display())]
    UnsupportedLanguage { path: PathBuf, found: String },
    #[error("{}: `defaultcode` must be a string or an object keyed by language", .path.display())]
    MalformedCode { path: PathBuf },
}

#[derive(Debug, Parser)]
#[command(name = "turtlegrade")]
#[command(about = "Grades a turtle graphics submission against a reference solution", long_about = None)]
#[command(version)]
pub struct Args {
    /// Reference solution: raw source, a JSON document with a `defaultcode` field,
    /// or a PNG drawing when the submission is one too
    #[arg(short, long)]
    pub reference: PathBuf,

    /// Submission to grade, in the same formats as the reference
    #[arg(short, long)]
    pub submission: PathBuf,

    /// Similarity needed to pass; defaults to 0.9 for state and 0.99 for image mode
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Wall-clock limit per side, in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Signal that decides the verdict
    #[arg(short, long, value_enum, default_value_t = GradingMode::State)]
    pub mode: GradingMode,

    /// Canvas width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Python interpreter used in state mode; overrides TURTLEGRADE_PYTHON
    #[arg(long)]
    pub python: Option<PathBuf>,

    /// Directory for the reference, submission and difference images in image mode
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Also write the JSON report to this file
    #[arg(long)]
    pub results: Option<PathBuf>,
}

impl Args {
    /// Environment defaults overridden by whatever flags were given.
    pub fn config(&self) -> GraderConfig {
        let mut config = GraderConfig::from_env();
        config.mode = self.mode;
        if let Some(threshold) = self.threshold {
            config.set_threshold(threshold);
        }
        if let Some(secs) = self.timeout {
            config.limits.timeout = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
        }
        let CanvasSize { width, height } = config.limits.canvas;
        config.limits.canvas = CanvasSize {
            width: self.width.unwrap_or(width),
            height: self.height.unwrap_or(height),
        };
        if let Some(python) = &self.python {
            config.python_path = python.clone();
        }
        if self.artifacts_dir.is_some() {
            config.artifacts_dir = self.artifacts_dir.clone();
        }
        config
    }
}

#[tracing::instrument]
pub fn load_code(path: &Path) -> Result<SubmissionCode, InputError> {
    let content = std::fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_code(path, content)
}

/// JSON documents carrying a `defaultcode` field yield that code; anything
/// else is taken as raw source.
pub fn parse_code(path: &Path, content: String) -> Result<SubmissionCode, InputError> {
    let code = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(mut doc)) => match doc.remove(CODE_FIELD) {
            Some(code) => code,
            None => return Ok(SubmissionCode::python(content)),
        },
        _ => return Ok(SubmissionCode::python(content)),
    };

    match code {
        Value::String(text) => Ok(SubmissionCode::python(text)),
        Value::Object(by_language) => {
            let found = by_language.keys().cloned().collect::<Vec<_>>().join(", ");
            by_language
                .into_iter()
                .find_map(|(tag, text)| match (Language::from_tag(&tag), text) {
                    (Some(language), Value::String(text)) => Some(SubmissionCode { text, language }),
                    _ => None,
                })
                .ok_or_else(|| InputError::UnsupportedLanguage {
                    path: path.to_path_buf(),
                    found,
                })
        }
        _ => Err(InputError::MalformedCode {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<SubmissionCode, InputError> {
        parse_code(Path::new("task.json"), content.to_string())
    }

    #[test]
    fn test_raw_source_is_taken_verbatim() {
        let code = parse("import turtle\nturtle.forward(10)\n").unwrap();
        assert_eq!(code.text, "import turtle\nturtle.forward(10)\n");
        assert_eq!(code.language, Language::Python);
    }

    #[test]
    fn test_code_field_as_string() {
        let code = parse(r#"{"title": "Square", "defaultcode": "import turtle\nturtle.circle(5)"}"#).unwrap();
        assert_eq!(code.text, "import turtle\nturtle.circle(5)");
    }

    #[test]
    fn test_code_field_keyed_by_language() {
        let code = parse(r#"{"defaultcode": {"java": "class A {}", "python": "print(1)"}}"#).unwrap();
        assert_eq!(code.text, "print(1)");
    }

    #[test]
    fn test_json_without_code_field_is_raw_source() {
        let content = r#"{"title": "Square"}"#;
        assert_eq!(parse(content).unwrap().text, content);
    }

    #[test]
    fn test_bad_code_fields_are_errors() {
        assert!(matches!(
            parse(r#"{"defaultcode": {"java": "class A {}"}}"#),
            Err(InputError::UnsupportedLanguage { found, .. }) if found == "java"
        ));
        assert!(matches!(
            parse(r#"{"defaultcode": 42}"#),
            Err(InputError::MalformedCode { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_code(&dir.path().join("absent.py")).unwrap_err();
        assert!(matches!(err, InputError::Read { .. }));
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "turtlegrade",
            "--reference",
            "ref.py",
            "--submission",
            "sub.py",
            "--mode",
            "image",
            "--threshold",
            "0.8",
            "--timeout",
            "5",
            "--width",
            "300",
        ]);
        let config = args.config();
        assert_eq!(config.mode, GradingMode::Image);
        assert_eq!(config.image_threshold, 0.8);
        assert_eq!(config.limits.timeout, Duration::from_secs(5));
        assert_eq!(config.limits.canvas, CanvasSize { width: 300, height: 500 });
    }
}
