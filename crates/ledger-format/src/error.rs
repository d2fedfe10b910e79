use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Malformed data at offset {offset}: {reason}")]
    Malformed {
        offset: usize,
        reason: String,
    },
    #[error("Checksum mismatch: expected {expected:016x}, found {found:016x}")]
    ChecksumMismatch {
        expected: u64,
        found: u64,
    },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Encoding error: {0}")]
    Encode(String),
}

impl FormatError {
    /// Byte offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            FormatError::Truncated { offset, .. } | FormatError::Malformed { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        FormatError::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;
