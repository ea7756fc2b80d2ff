use thiserror::Error;

/// Why an expression failed to parse.
///
/// Offsets are byte offsets into the input text. Any partially built tree is
/// dropped before one of these is returned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("unknown function '{name}' at offset {offset}")]
    UnknownFunction { name: String, offset: usize },

    #[error("invalid numeric literal '{literal}' at offset {offset}")]
    InvalidNumber { literal: String, offset: usize },

    #[error("empty expression")]
    Empty,

    #[error("incomplete expression tree at offset {offset}")]
    Dangling { offset: usize },
}

/// Why a checked evaluation could not run.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("expected {expected} variable values, got {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("expected columns of length {expected}, got {found}")]
    ColumnLength { expected: usize, found: usize },
}
