use thiserror::Error;

use crate::span::{Location, SourceId};

/// The single diagnostic produced by a compilation.
///
/// Each stage has its own variant. A diagnostic is always fatal: the
/// first one ends the run and no partial output is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("lex error at {location}: {message}")]
    LexError { location: Location, message: String },
    #[error("parse error at {location}: {message}")]
    ParseError { location: Location, message: String },
    #[error("semantic error at {location}: {message}")]
    SemanticError { location: Location, message: String },
    #[error("codegen error at {location}: {message}")]
    CodegenError { location: Location, message: String },
    #[error("wasm backend error: {0}")]
    BackendError(String),
}

impl CoreError {
    pub fn lex(source: &SourceId, line: u32, message: impl Into<String>) -> Self {
        CoreError::LexError {
            location: Location::new(source.clone(), line),
            message: message.into(),
        }
    }

    pub fn parse(source: &SourceId, line: u32, message: impl Into<String>) -> Self {
        CoreError::ParseError {
            location: Location::new(source.clone(), line),
            message: message.into(),
        }
    }

    pub fn semantic(source: &SourceId, line: u32, message: impl Into<String>) -> Self {
        CoreError::SemanticError {
            location: Location::new(source.clone(), line),
            message: message.into(),
        }
    }

    pub fn codegen(source: &SourceId, line: u32, message: impl Into<String>) -> Self {
        CoreError::CodegenError {
            location: Location::new(source.clone(), line),
            message: message.into(),
        }
    }

    /// The human-readable message without the stage and location prefix.
    pub fn message(&self) -> &str {
        match self {
            CoreError::LexError { message, .. }
            | CoreError::ParseError { message, .. }
            | CoreError::SemanticError { message, .. }
            | CoreError::CodegenError { message, .. } => message,
            CoreError::BackendError(message) => message,
        }
    }

    /// Where the diagnostic was raised, if it refers to source text.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CoreError::LexError { location, .. }
            | CoreError::ParseError { location, .. }
            | CoreError::SemanticError { location, .. }
            | CoreError::CodegenError { location, .. } => Some(location),
            CoreError::BackendError(_) => None,
        }
    }
}
