//! Marker protocol
//!
//! Decodes the textual call records captured by the instrumentation layer
//! into [`CallRecord`](crate::types::record::CallRecord)s and encodes them
//! back into canonical JSON.
//!
//! Two textual forms are accepted: canonical JSON, and the producer's native
//! literal syntax (quoted strings, tuples, `True`/`False`/`None`). Both are
//! parsed into a JSON value tree and then validated against the marker
//! schema. Captured text is never evaluated.

pub mod literal;
pub mod marker;

use thiserror::Error;

pub use marker::{decode, decode_value, encode};

/// A captured record that could not be turned into a `CallRecord`
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("record does not match the marker schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("argument {index}: unknown kind '{kind}'")]
    UnknownKind { index: usize, kind: String },

    #[error("argument {index} ({kind}): missing required field '{field}'")]
    MissingField {
        index: usize,
        kind: String,
        field: &'static str,
    },

    #[error("argument {index} ({kind}): field '{field}' is not allowed")]
    UnexpectedField {
        index: usize,
        kind: String,
        field: &'static str,
    },

    #[error("argument {index}: invalid {field}: {message}")]
    InvalidValue {
        index: usize,
        field: &'static str,
        message: String,
    },
}
