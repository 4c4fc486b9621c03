use thiserror::Error;

/// Convenience alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Top-level error type for map mutation and persistence.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A single candidate value is larger than the configured byte ceiling.
    /// The write is rejected and the structure is left unchanged. Exceeding
    /// the *aggregate* ceiling is not an error; it clears the structure and
    /// the insert proceeds.
    #[error("value of {size} bytes exceeds the configured limit of {limit} bytes")]
    SizeExceeded { size: i64, limit: i64 },

    /// The on-disk stream is not a valid store file.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Filesystem failure, surfaced unchanged.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode-level failures while parsing a persisted image.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Leading magic bytes do not identify a store file.
    #[error("bad magic bytes: not a stashmap file")]
    BadMagic,

    /// The file was written by an incompatible format revision.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// A length prefix fell outside the accepted `0..=2^30` range.
    #[error("length prefix {0} out of range")]
    LengthOutOfRange(i64),

    /// The input ended before a complete field could be read.
    #[error("truncated input: needed {expected} bytes, {actual} remain")]
    Truncated { expected: usize, actual: usize },

    /// A length-prefixed payload failed to parse (invalid UTF-8, malformed
    /// structured blob, and similar).
    #[error("malformed value payload: {0}")]
    Value(String),
}
