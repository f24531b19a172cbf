pub const STATE_BEGIN_MARKER: &str = "##TURTLEGRADE:STATE:BEGIN";
pub const STATE_END_MARKER: &str = "##TURTLEGRADE:STATE:END";
pub const ERROR_BEGIN_MARKER: &str = "##TURTLEGRADE:ERROR:BEGIN";
pub const ERROR_END_MARKER: &str = "##TURTLEGRADE:ERROR:END";
pub const MARKER_PREFIX: &str = "##TURTLEGRADE:";
pub const ESCAPE_CHAR: char = '\\';

pub const DEFAULT_INSTANCE: &str = "t";

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 200;
pub const DEFAULT_STDOUT_LIMIT_BYTES: u64 = 8 * 1024 * 1024;
pub const DEFAULT_STATE_THRESHOLD: f64 = 0.9;
pub const DEFAULT_IMAGE_THRESHOLD: f64 = 0.99;
pub const DEFAULT_SSIM_WEIGHT: f64 = 0.7;
pub const DEFAULT_DENSITY_WEIGHT: f64 = 0.3;
pub const DEFAULT_CANVAS_WIDTH: u32 = 500;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 500;
pub const DEFAULT_STEP_BUDGET: u64 = 5_000_000;

pub const PYTHON_ENV_VAR: &str = "TURTLEGRADE_PYTHON";
pub const DEFAULT_PYTHON: &str = "python3";
