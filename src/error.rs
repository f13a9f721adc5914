//! Errors reported by the rendering entry points.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Everything that can stop a render.
///
/// Only [`TemplateError::UndefinedName`] is recoverable, and only when the caller
/// supplies an undefined-name collector; every other kind bubbles up unhandled.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// An `if`/`for` without its `end`, an `else`/`end` without an opener, or
    /// blocks nested too deeply.
    #[error("block structure error at `{construct}`: {message}")]
    Structural {
        /// The offending construct, e.g. `if`, `for`, `else` or `end`.
        construct: String,
        /// What is wrong with it.
        message: String,
    },

    /// A fragment that is not valid expression syntax.
    #[error("syntax error in `{fragment}`: {message}")]
    Syntax { fragment: String, message: String },

    /// A fragment that parsed but failed to evaluate.
    #[error("failed to evaluate `{fragment}`: {message}")]
    Evaluation { fragment: String, message: String },

    /// A referenced name that is not bound in the context.
    #[error("undefined name `{0}`")]
    UndefinedName(String),

    /// Raised by `expect(condition, message)`.
    #[error("{0}")]
    Assertion(String),

    /// Raised by `shell(command)` when the command cannot run or exits non-zero.
    #[error("command `{command}` failed with {status}: {stderr}")]
    Process {
        command: String,
        status: String,
        stderr: String,
    },

    /// Includes nested deeper than the configured limit, usually a cycle.
    #[error("include depth limit of {limit} exceeded while including `{path}`")]
    IncludeDepth { path: String, limit: usize },

    /// The file locator could not resolve an include path.
    #[error("cannot locate included template `{0}`")]
    IncludeNotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TemplateError {
    pub(crate) fn structural(construct: &str, message: impl Into<String>) -> Self {
        TemplateError::Structural {
            construct: construct.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TemplateError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure while evaluating one expression.
///
/// The interpreter attaches the fragment text when turning this into a
/// [`TemplateError`]; [`EvalError::Fatal`] carries an error raised by an intrinsic,
/// which is propagated unchanged.
#[derive(Debug)]
pub(crate) enum EvalError {
    UndefinedName(String),
    Invalid(String),
    Fatal(Box<TemplateError>),
}

impl EvalError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EvalError::Invalid(message.into())
    }
}

impl From<TemplateError> for EvalError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::UndefinedName(name) => EvalError::UndefinedName(name),
            other => EvalError::Fatal(Box::new(other)),
        }
    }
}
