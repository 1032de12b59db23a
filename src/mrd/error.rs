use std::path::PathBuf;

/// Errors that can occur while writing or reading MRD streams
#[derive(Debug, thiserror::Error)]
pub enum MrdError {
    /// The output could not be created, written or persisted
    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        /// Target path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error on a stream
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The XML header could not be produced or parsed
    #[error("XML header error: {0}")]
    XmlError(String),

    /// A required header element is missing or malformed
    #[error("invalid header element '{element}': {reason}")]
    InvalidHeader {
        /// Element path
        element: String,
        /// What was wrong with it
        reason: String,
    },

    /// The stream violates the message framing
    #[error("invalid MRD stream: {0}")]
    InvalidStream(String),

    /// An acquisition's payload does not match its header counts
    #[error("acquisition {index} is inconsistent: {reason}")]
    InvalidAcquisition {
        /// Position in the stream
        index: usize,
        /// What was wrong with it
        reason: String,
    },
}

impl MrdError {
    pub(crate) fn xml(error: impl std::fmt::Display) -> Self {
        Self::XmlError(error.to_string())
    }

    pub(crate) fn invalid(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            element: element.into(),
            reason: reason.into(),
        }
    }
}
