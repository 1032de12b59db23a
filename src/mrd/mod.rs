//! # MRD output
//!
//! ISMRMRD raw data in the MRD streaming format: one XML header message
//! followed by acquisition messages and a close message.
//!
//! - [`header`]: the XML header model
//! - [`xml`]: header (de)serialization
//! - [`acquisition`]: the 340-byte acquisition header and sample payload
//! - [`writer`]: ordered, atomic output
//! - [`reader`]: read-back for verification and inspection

pub mod acquisition;
mod error;
pub mod header;
pub mod reader;
pub mod writer;
pub mod xml;

pub use acquisition::{flags, Acquisition, AcquisitionHeader, EncodingCounters};
pub use error::MrdError;
pub use header::{
    AcquisitionSystem, Encoding, EncodingLimits, EncodingSpace, Limit, MrdHeader,
    SequenceParameters, Trajectory, TrajectoryDescription, UserParameterValue, UserParameters,
};
pub use reader::{read_dataset, MrdReader};
pub use writer::{write_dataset, MrdDataset, MrdWriter};
