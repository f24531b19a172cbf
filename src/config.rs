use std::path::PathBuf;

use crate::compare::BlendWeights;
use crate::constants::{
    DEFAULT_IMAGE_THRESHOLD, DEFAULT_PYTHON, DEFAULT_STATE_THRESHOLD, PYTHON_ENV_VAR,
};
use crate::core::domain::{ExecutionLimits, GradingMode};

/// Smallest canvas side the image comparator can work with.
const MIN_CANVAS_SIDE: u32 = 16;
const MAX_CANVAS_SIDE: u32 = 4096;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("blend weights must be non-negative and sum to 1, got {ssim} and {density}")]
    InvalidWeights { ssim: f64, density: f64 },
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("canvas {width}x{height} must be between 16 and 4096 pixels per side")]
    CanvasSize { width: u32, height: u32 },
}

/// Everything a grading run needs; built once and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct GraderConfig {
    pub python_path: PathBuf,
    pub mode: GradingMode,
    pub limits: ExecutionLimits,
    pub state_threshold: f64,
    pub image_threshold: f64,
    pub weights: BlendWeights,
    /// Where sandbox scripts are written while they run.
    pub scratch_dir: PathBuf,
    /// Where image mode drops its inspection PNGs, if anywhere.
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from(DEFAULT_PYTHON),
            mode: GradingMode::default(),
            limits: ExecutionLimits::default(),
            state_threshold: DEFAULT_STATE_THRESHOLD,
            image_threshold: DEFAULT_IMAGE_THRESHOLD,
            weights: BlendWeights::default(),
            scratch_dir: std::env::temp_dir().join("turtlegrade"),
            artifacts_dir: None,
        }
    }
}

impl GraderConfig {
    /// Defaults with the interpreter path taken from the environment when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(PYTHON_ENV_VAR) {
            if !path.trim().is_empty() {
                tracing::debug!(%path, "python interpreter from environment");
                config.python_path = PathBuf::from(path);
            }
        }
        config
    }

    /// Threshold of the active mode.
    pub fn threshold(&self) -> f64 {
        match self.mode {
            GradingMode::State => self.state_threshold,
            GradingMode::Image => self.image_threshold,
        }
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        match self.mode {
            GradingMode::State => self.state_threshold = threshold,
            GradingMode::Image => self.image_threshold = threshold,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for t in [self.state_threshold, self.image_threshold] {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::InvalidThreshold(t));
            }
        }
        let BlendWeights { ssim, density } = self.weights;
        if ssim < 0.0 || density < 0.0 || ((ssim + density) - 1.0).abs() > 1e-9 {
            return Err(ConfigError::InvalidWeights { ssim, density });
        }
        if self.limits.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        let canvas = self.limits.canvas;
        let side = MIN_CANVAS_SIDE..=MAX_CANVAS_SIDE;
        if !side.contains(&canvas.width) || !side.contains(&canvas.height) {
            return Err(ConfigError::CanvasSize {
                width: canvas.width,
                height: canvas.height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::domain::CanvasSize;

    #[test]
    fn test_defaults_are_valid() {
        let config = GraderConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.threshold(), 0.9);
        assert_eq!(config.limits.timeout, Duration::from_secs(120));
        assert_eq!(config.limits.canvas, CanvasSize { width: 500, height: 500 });
    }

    #[test]
    fn test_threshold_follows_mode() {
        let mut config = GraderConfig {
            mode: GradingMode::Image,
            ..GraderConfig::default()
        };
        assert_eq!(config.threshold(), 0.99);
        config.set_threshold(0.8);
        assert_eq!(config.image_threshold, 0.8);
        assert_eq!(config.state_threshold, 0.9);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = GraderConfig::default();
        config.set_threshold(1.5);
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(1.5)));

        let mut config = GraderConfig::default();
        config.weights = BlendWeights { ssim: 0.9, density: 0.3 };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWeights { .. })));

        let mut config = GraderConfig::default();
        config.limits.timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));

        let mut config = GraderConfig::default();
        config.limits.canvas = CanvasSize { width: 4, height: 500 };
        assert!(matches!(config.validate(), Err(ConfigError::CanvasSize { .. })));
    }
}
