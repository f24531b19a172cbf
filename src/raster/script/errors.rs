use crate::raster::watchdog::Interrupt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("SyntaxError: {msg} (line {line})")]
    Syntax { line: usize, msg: String },
    #[error("{kind}: {msg} (line {line})")]
    Runtime {
        line: usize,
        kind: &'static str,
        msg: String,
    },
    #[error("interrupted: {0}")]
    Interrupted(Interrupt),
}

impl ScriptError {
    pub fn syntax(line: usize, msg: impl Into<String>) -> Self {
        ScriptError::Syntax {
            line,
            msg: msg.into(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, ScriptError::Interrupted(_))
    }
}

/// Runtime failure raised while evaluating; the line is filled in by the
/// statement that was executing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Raise {
    Error { kind: &'static str, msg: String },
    Interrupted(Interrupt),
    Located(ScriptError),
}

impl Raise {
    pub fn new(kind: &'static str, msg: impl Into<String>) -> Self {
        Raise::Error {
            kind,
            msg: msg.into(),
        }
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Raise::new("TypeError", msg)
    }

    pub fn value_error(msg: impl Into<String>) -> Self {
        Raise::new("ValueError", msg)
    }

    pub fn at(self, line: usize) -> ScriptError {
        match self {
            Raise::Error { kind, msg } => ScriptError::Runtime { line, kind, msg },
            Raise::Interrupted(i) => ScriptError::Interrupted(i),
            Raise::Located(e) => e,
        }
    }
}

impl From<Interrupt> for Raise {
    fn from(i: Interrupt) -> Self {
        Raise::Interrupted(i)
    }
}
