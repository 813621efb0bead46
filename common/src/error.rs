use std::{io, path::PathBuf};

use thiserror::Error;

use crate::Format;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure to decode a single asset.
///
/// Text format variants carry the 1-based line number of the offending line.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{format}: {field} at offset {offset} needs {needed} bytes, {available} available")]
    BufferTooShort {
        format: Format,
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("{format}: bad magic {found:?}")]
    BadMagic { format: Format, found: Vec<u8> },
    #[error("{format}: line {line}: missing {field}")]
    MissingField {
        format: Format,
        line: usize,
        field: &'static str,
    },
    #[error("{format}: line {line}: invalid {field} {value:?}")]
    InvalidField {
        format: Format,
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("{format}: {field} {index} out of range for {len} items")]
    IndexOutOfRange {
        format: Format,
        field: &'static str,
        index: i64,
        len: usize,
    },
    #[error("{format}: unexpected end of input, expected {expected}")]
    UnexpectedEof { format: Format, expected: &'static str },
    #[error("{format}: line {line}: expected {expected}, found {found:?}")]
    UnexpectedLine {
        format: Format,
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[error("{format}: unsupported {field} {value}")]
    Unsupported {
        format: Format,
        field: &'static str,
        value: i64,
    },
    #[error("{format}: hierarchy node {node} has a cyclic parent chain")]
    HierarchyCycle { format: Format, node: usize },
    #[error("{format}: unable to load {name}")]
    Resource {
        format: Format,
        name: String,
        #[source]
        source: BoxError,
    },
    #[error("{format}: unable to read {field}")]
    Binary {
        format: Format,
        field: &'static str,
        #[source]
        source: binrw::Error,
    },
    #[error("unable to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DecodeError {
    pub fn format(&self) -> Option<Format> {
        match self {
            DecodeError::BufferTooShort { format, .. }
            | DecodeError::BadMagic { format, .. }
            | DecodeError::MissingField { format, .. }
            | DecodeError::InvalidField { format, .. }
            | DecodeError::IndexOutOfRange { format, .. }
            | DecodeError::UnexpectedEof { format, .. }
            | DecodeError::UnexpectedLine { format, .. }
            | DecodeError::Unsupported { format, .. }
            | DecodeError::HierarchyCycle { format, .. }
            | DecodeError::Resource { format, .. }
            | DecodeError::Binary { format, .. } => Some(*format),
            DecodeError::Io { .. } => None,
        }
    }

    /// Checks an index that is either the `-1` "none" sentinel or a position in a
    /// collection of `len` items.
    pub fn check_optional_index(
        format: Format,
        field: &'static str,
        index: i32,
        len: usize,
    ) -> Result<(), DecodeError> {
        if index == -1 {
            Ok(())
        } else {
            Self::check_index(format, field, index, len)
        }
    }

    pub fn check_index(
        format: Format,
        field: &'static str,
        index: i32,
        len: usize,
    ) -> Result<(), DecodeError> {
        if index >= 0 && (index as usize) < len {
            Ok(())
        } else {
            Err(DecodeError::IndexOutOfRange {
                format,
                field,
                index: index.into(),
                len,
            })
        }
    }
}
