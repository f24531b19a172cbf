/// Native module runs submissions as real child processes
/// of a locally installed Python interpreter.
pub mod executor;
