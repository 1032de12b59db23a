//! # Siemens twix reader
//!
//! Reads the raw-data container written by Siemens MR scanners:
//!
//! 1. [`header`] locates the imaging measurement and splits its header into
//!    named text buffers.
//! 2. [`protocol`] parses those buffers into key/value lookups.
//! 3. [`layout`] selects the record layout for the software line.
//! 4. [`record`] lazily decodes acquisition records.
//!
//! ## Example
//!
//! ```rust,no_run
//! use twix2mrd::twix::TwixFile;
//!
//! let twix = TwixFile::open("meas_MID00042_FID12345_xe_dixon.dat")?;
//! println!("{:?}, protocol {:?}", twix.version(), twix.protocol().protocol_name());
//! for record in twix.records() {
//!     let record = record?;
//!     println!("scan {} line {}", record.header().scan_counter, record.counters().line);
//! }
//! # Ok::<(), twix2mrd::twix::TwixError>(())
//! ```

pub mod builder;
mod error;
pub mod header;
pub mod layout;
pub mod protocol;
pub mod record;

#[cfg(test)]
mod tests;

use std::path::Path;

use log::{debug, warn};

pub use error::TwixError;
pub use header::{ContainerKind, HeaderBuffer, MeasurementEntry, MeasurementHeader};
pub use layout::FormatVersion;
pub use protocol::{ProtocolHeader, ProtocolWarning};
pub use record::{ChannelData, EvalInfoMask, LoopCounters, RawRecord, RecordDecoder, RecordHeader};

/// An opened twix file with its header parsed and records not yet decoded
#[derive(Debug)]
pub struct TwixFile {
    bytes: Vec<u8>,
    measurement: MeasurementHeader,
    protocol: ProtocolHeader,
    version: FormatVersion,
}

impl TwixFile {
    /// Read and parse the header of a file on disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TwixError> {
        let path = path.as_ref();
        debug!("Reading {}", path.display());
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Parse the header of an in-memory file
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TwixError> {
        let mut measurement = header::read_measurement_header(&bytes)?;
        let buffers = std::mem::take(&mut measurement.buffers);
        let protocol = ProtocolHeader::parse(buffers);
        for warning in protocol.warnings() {
            warn!("Protocol header: {warning}");
        }
        let version = FormatVersion::detect(&protocol, measurement.kind);
        debug!(
            "{:?} container, {} measurement(s), {:?} layout, records at byte {}",
            measurement.kind, measurement.measurement_count, version, measurement.data_offset
        );

        Ok(Self {
            bytes,
            measurement,
            protocol,
            version,
        })
    }

    /// Container and measurement layout
    pub fn measurement(&self) -> &MeasurementHeader {
        &self.measurement
    }

    /// Parsed protocol buffers
    pub fn protocol(&self) -> &ProtocolHeader {
        &self.protocol
    }

    /// Record layout in use
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Lazy decoder positioned at the first record
    pub fn records(&self) -> RecordDecoder<'_> {
        RecordDecoder::new(
            &self.bytes,
            self.measurement.data_offset as usize,
            self.measurement.data_end as usize,
            self.version,
        )
    }

    /// Decode every record and release the file bytes
    pub fn into_container(self) -> Result<RawContainer, TwixError> {
        let records = self.records().collect::<Result<Vec<_>, _>>()?;
        debug!("Decoded {} records", records.len());
        Ok(RawContainer {
            protocol: self.protocol,
            version: self.version,
            kind: self.measurement.kind,
            records,
        })
    }
}

/// Fully decoded measurement: protocol plus records in file order
#[derive(Debug, Clone)]
pub struct RawContainer {
    /// Protocol buffers
    pub protocol: ProtocolHeader,
    /// Layout the records were decoded with
    pub version: FormatVersion,
    /// Container shape
    pub kind: ContainerKind,
    /// Records in file order
    pub records: Vec<RawRecord>,
}

impl RawContainer {
    /// Read and decode a file in one step
    pub fn read(path: impl AsRef<Path>) -> Result<Self, TwixError> {
        TwixFile::open(path)?.into_container()
    }

    /// Maximum channel count over all records
    pub fn receiver_channels(&self) -> Option<usize> {
        self.records.iter().map(RawRecord::channel_count).max()
    }
}
