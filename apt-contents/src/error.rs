//! Error types for the APT Contents library.

/// Result type for APT Contents operations.
pub type Result<T> = std::result::Result<T, ContentsError>;

/// Errors that can occur when reading a Contents index.
#[derive(Debug, thiserror::Error)]
pub enum ContentsError {
    /// I/O error while reading or decompressing the index.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Too many lines could not be parsed.
    #[error("Corrupt contents index: {skipped} of {total} lines malformed")]
    CorruptFeed {
        /// Number of malformed lines.
        skipped: u64,
        /// Number of lines considered, malformed ones included.
        total: u64,
    },

    /// The index did not contain a single entry.
    #[error("Contents index contains no entries")]
    EmptyFeed,
}

impl ContentsError {
    /// Whether this error was caused by the content of the index rather than
    /// by the transport that delivered it.
    pub fn is_content_error(&self) -> bool {
        matches!(self, Self::CorruptFeed { .. } | Self::EmptyFeed)
    }
}
