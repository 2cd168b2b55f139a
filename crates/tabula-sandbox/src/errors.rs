//! Sandbox error types.

use crate::ast::Position;

/// Script text that does not parse.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at line {}, column {}: {message}", .position.line, .position.column)]
pub struct ParseError {
    /// What was expected and what was found.
    pub message: String,
    /// Where parsing stopped.
    pub position: Position,
}

/// Failure raised while evaluating a script.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// The script did not parse.
    #[error(transparent)]
    Syntax(#[from] ParseError),

    /// A name was used before being defined.
    #[error("name '{name}' is not defined. Defined names: {available}")]
    Undefined {
        /// Missing name.
        name: String,
        /// Comma-separated names in scope.
        available: String,
    },

    /// An unknown primitive was called.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// A primitive rejected its arguments or data.
    #[error("{0}")]
    Runtime(String),

    /// The evaluation step budget ran out.
    #[error("evaluation exceeded the step budget of {0}")]
    StepLimit(u64),

    /// Expressions nested deeper than the configured limit.
    #[error("expressions are nested deeper than the limit of {0} levels")]
    DepthLimit(usize),

    /// A produced table grew past the row limit.
    #[error("a table with {rows} rows exceeds the limit of {limit} rows")]
    RowLimit {
        /// Rows produced.
        rows: usize,
        /// Configured maximum.
        limit: usize,
    },
}

impl ScriptError {
    /// Shorthand for [`ScriptError::Runtime`].
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

/// Result alias used by primitives.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// A failed script run, with a trace of the forms being evaluated.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CodeExecutionError {
    /// `Error executing generated code: ...`
    pub message: String,
    /// One line per active form, outermost first, then the error itself.
    pub stack_trace: String,
}

/// Outcome of a failed [`Sandbox::execute`](crate::Sandbox::execute).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// The script failed to parse or raised during evaluation.
    #[error(transparent)]
    Execution(#[from] CodeExecutionError),

    /// The script ran but did not define the required output.
    #[error("{message}")]
    Output {
        /// Explanation fed back to the LLM.
        message: String,
    },
}

impl SandboxError {
    /// Stack trace, for execution failures.
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::Execution(e) => Some(&e.stack_trace),
            Self::Output { .. } => None,
        }
    }

    /// Build an output failure.
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }
}
