//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::fmt;
use thiserror::Error;

use crate::parameter::ParameterError;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Policy error: {message}")]
    Policy { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a render failed
///
/// `Compile` and `NotConcrete` both need the definition author to act and
/// are never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    /// The template (or its parameter block) failed to parse or compile
    Compile,
    /// The template compiled but failed while evaluating
    Evaluation,
    /// Evaluation finished but left an unresolved value behind
    NotConcrete,
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Compile => "template failed to compile",
            Self::Evaluation => "template evaluation failed",
            Self::NotConcrete => "template result is not concrete",
        };
        f.write_str(text)
    }
}

/// Render failure with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{kind}: {message}")]
#[diagnostic(code(kdp::template::render))]
pub struct RenderError {
    pub kind: RenderErrorKind,

    pub message: String,

    /// Path of the offending value (e.g. `output.metadata.name`)
    pub path: Option<String>,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            src: NamedSource::new("<template>", String::new()),
            span: None,
            suggestion: None,
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::Compile, message)
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::Evaluation, message)
    }

    pub fn not_concrete(path: impl Into<String>, message: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            message: format!("{}: {}", path, message.into()),
            path: Some(path),
            ..Self::new(RenderErrorKind::NotConcrete, String::new())
        }
    }

    /// Attach the template source and highlight a 1-based line
    pub fn with_source(mut self, name: &str, source: &str, line: Option<usize>) -> Self {
        self.span = line.and_then(|line| calculate_span(source, line));
        self.src = NamedSource::new(name, source.to_string());
        self
    }

    pub fn kind(&self) -> RenderErrorKind {
        self.kind
    }

    /// Map a MiniJinja error onto the render taxonomy
    pub fn from_minijinja(err: &minijinja::Error, name: &str, source: &str) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::SyntaxError
            | minijinja::ErrorKind::UnknownFilter
            | minijinja::ErrorKind::UnknownFunction
            | minijinja::ErrorKind::UnknownTest
            | minijinja::ErrorKind::TemplateNotFound => RenderErrorKind::Compile,
            minijinja::ErrorKind::UndefinedError => RenderErrorKind::NotConcrete,
            _ => RenderErrorKind::Evaluation,
        };

        let message = err
            .detail()
            .map(|d| format!("{} ({})", err.kind(), d))
            .unwrap_or_else(|| err.kind().to_string());

        let suggestion = match kind {
            RenderErrorKind::NotConcrete => Some(
                "guard optional parameters with `{% if parameter.x is defined %}` or declare a default with `*value`"
                    .to_string(),
            ),
            _ => None,
        };

        Self {
            kind,
            message,
            path: None,
            src: NamedSource::new(name, String::new()),
            span: None,
            suggestion,
        }
        .with_source(name, source, err.line())
    }
}

impl From<ParameterError> for RenderError {
    fn from(err: ParameterError) -> Self {
        RenderError::compile(err.to_string())
    }
}

/// Schema derivation failures
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid parameter block: {0}")]
    Parameter(#[from] ParameterError),

    #[error("invalid derived schema: {message}")]
    InvalidSchema { message: String },
}

/// A malformed `+directive=value` annotation
///
/// Never fatal: the directive is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("field '{field}': invalid value '{value}' for directive '{directive}': {reason}")]
pub struct DirectiveError {
    pub field: String,
    pub directive: String,
    pub value: String,
    pub reason: String,
}

/// Calculate a source span covering a 1-based line
fn calculate_span(source: &str, line: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (index, text) in source.split('\n').enumerate() {
        if index + 1 == line {
            return Some(SourceSpan::new(offset.into(), text.len()));
        }
        offset += text.len() + 1;
    }
    None
}
