/// Errors that can occur while mapping a scan onto an MRD header
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// A field required in every MRD header could not be populated
    #[error("incomplete metadata: missing {field}")]
    IncompleteMetadata {
        /// Header field that is missing
        field: &'static str,
    },

    /// A record's counts do not fit the MRD acquisition header
    #[error("record {ordinal} cannot be stored as an MRD acquisition")]
    UnrepresentableRecord {
        /// Position among decoded records in file order
        ordinal: usize,
    },
}

impl MetadataError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self::IncompleteMetadata { field }
    }
}
