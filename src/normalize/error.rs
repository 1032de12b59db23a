use super::Dimension;

/// Errors that can occur while assigning encoding indices
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Observed indices leave gaps inside the encoding limits
    #[error("sparse encoding space: {dimension} is missing indices {missing:?}")]
    SparseEncodingSpace {
        /// First dimension with gaps
        dimension: Dimension,
        /// Indices inside the limit that no acquisition carries
        missing: Vec<u16>,
    },

    /// A normalized counter exceeds the 16-bit index range
    #[error("{dimension} index {value} exceeds the 16-bit range")]
    CounterOverflow {
        /// Dimension
        dimension: Dimension,
        /// Value reached
        value: u32,
    },
}
