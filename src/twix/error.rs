/// Errors that can occur while reading a twix container
#[derive(Debug, thiserror::Error)]
pub enum TwixError {
    /// I/O error while reading the input file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Container or measurement header lengths are inconsistent with the file
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A record declares more bytes than remain in the file
    #[error("truncated record at byte {offset}: needs {needed} bytes, {available} available")]
    TruncatedRecord {
        /// File offset of the record start
        offset: u64,
        /// Bytes the record header declares
        needed: u64,
        /// Bytes left in the file
        available: u64,
    },

    /// A record header carries counts outside the accepted range
    #[error("invalid record at byte {offset}: {reason}")]
    InvalidRecord {
        /// File offset of the record start
        offset: u64,
        /// What was wrong with it
        reason: String,
    },
}

impl TwixError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedHeader(message.into())
    }
}
