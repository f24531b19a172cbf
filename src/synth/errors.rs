#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    #[error("submission is empty")]
    EmptySubmission,
    #[error("submission contains control character U+{code:04X} on line {line}")]
    ControlCharacter { line: usize, code: u32 },
}
