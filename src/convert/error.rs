use std::fmt;

use serde::Serialize;

use crate::classify::ClassifyError;
use crate::metadata::MetadataError;
use crate::mrd::MrdError;
use crate::normalize::NormalizeError;
use crate::twix::TwixError;

/// Errors that can occur while converting one twix file
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Error reading or decoding the twix file
    #[error("twix error: {0}")]
    TwixError(#[from] TwixError),

    /// The scan could not be classified
    #[error("{0}")]
    ClassifyError(#[from] ClassifyError),

    /// Encoding indices could not be assigned
    #[error("normalization error: {0}")]
    NormalizeError(#[from] NormalizeError),

    /// Required header metadata is missing
    #[error("metadata error: {0}")]
    MetadataError(#[from] MetadataError),

    /// Error writing the MRD output
    #[error("MRD error: {0}")]
    MrdError(#[from] MrdError),
}

/// Failure category reported in conversion summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unreadable or inconsistent file header
    MalformedHeader,
    /// File ends inside a record
    TruncatedRecord,
    /// Record counts outside the supported range
    InvalidRecord,
    /// No category markers
    UnrecognizedScan,
    /// Dixon echo count unknown
    AmbiguousDixonLayout,
    /// Gaps in the encoding space
    SparseEncodingSpace,
    /// A counter does not fit its MRD field
    CounterOverflow,
    /// Required header field missing
    IncompleteMetadata,
    /// Output could not be written
    WriteFailure,
    /// Other I/O failure
    Io,
}

impl ErrorKind {
    /// Snake-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedHeader => "malformed_header",
            Self::TruncatedRecord => "truncated_record",
            Self::InvalidRecord => "invalid_record",
            Self::UnrecognizedScan => "unrecognized_scan",
            Self::AmbiguousDixonLayout => "ambiguous_dixon_layout",
            Self::SparseEncodingSpace => "sparse_encoding_space",
            Self::CounterOverflow => "counter_overflow",
            Self::IncompleteMetadata => "incomplete_metadata",
            Self::WriteFailure => "write_failure",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConversionError {
    /// Summary category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TwixError(TwixError::IoError(_)) => ErrorKind::Io,
            Self::TwixError(TwixError::MalformedHeader(_)) => ErrorKind::MalformedHeader,
            Self::TwixError(TwixError::TruncatedRecord { .. }) => ErrorKind::TruncatedRecord,
            Self::TwixError(TwixError::InvalidRecord { .. }) => ErrorKind::InvalidRecord,
            Self::ClassifyError(ClassifyError::UnrecognizedScan { .. }) => ErrorKind::UnrecognizedScan,
            Self::ClassifyError(ClassifyError::AmbiguousDixonLayout(_)) => {
                ErrorKind::AmbiguousDixonLayout
            }
            Self::NormalizeError(NormalizeError::SparseEncodingSpace { .. }) => {
                ErrorKind::SparseEncodingSpace
            }
            Self::NormalizeError(NormalizeError::CounterOverflow { .. }) => ErrorKind::CounterOverflow,
            Self::MetadataError(MetadataError::IncompleteMetadata { .. }) => {
                ErrorKind::IncompleteMetadata
            }
            Self::MetadataError(MetadataError::UnrepresentableRecord { .. })
            | Self::MrdError(MrdError::InvalidAcquisition { .. }) => ErrorKind::InvalidRecord,
            Self::MrdError(MrdError::WriteFailure { .. }) => ErrorKind::WriteFailure,
            Self::MrdError(_) => ErrorKind::Io,
        }
    }

    /// Whether the file is skipped rather than failed
    pub fn is_skip(&self) -> bool {
        self.kind() == ErrorKind::UnrecognizedScan
    }
}
