//! Error types for format decoding and parsing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural violation: bad magic, truncation, out-of-bounds offset,
    /// ordering violation. Always fatal to the single decode/parse call.
    #[error("invalid {what}: {detail}")]
    Invalid { what: &'static str, detail: String },

    #[error("checksum mismatch in {0}")]
    Checksum(&'static str),

    /// A feature the format allows but this decoder does not implement,
    /// kept distinct from [`FormatError::Invalid`] so callers can log a
    /// clear "unsupported" diagnosis instead of a generic decode failure.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl FormatError {
    pub fn invalid(what: &'static str, detail: impl Into<String>) -> Self {
        FormatError::Invalid {
            what,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;
