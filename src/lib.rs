//! # twix2mrd - Siemens twix to MRD conversion for 129Xe MRI
//!
//! `twix2mrd` converts the raw data of a hyperpolarized 129Xe lung MRI visit,
//! as written by Siemens scanners in the twix `.dat` container, into ISMRMRD
//! raw data files in the MRD streaming format. One visit yields up to three
//! consortium files:
//!
//! - **calibration**: dynamic spectroscopy FIDs, dissolved then gas
//! - **dixon**: radial 3D with interleaved gas and dissolved readouts
//! - **proton**: anatomical radial UTE
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use twix2mrd::prelude::*;
//!
//! let settings = SubjectConfig::from_file("007-005B.toml")?.resolve();
//! let converter = Converter::new(settings);
//! let summary = converter.convert_all(true)?;
//! println!("{}", summary.format_colored());
//! std::process::exit(summary.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Output files are named `{subject_id}_{category}.mrd` and are written
//! atomically: a file that fails conversion leaves nothing behind.
//!
//! ## Pipeline
//!
//! Each input file passes through the same stages, and any stage may fail
//! the file without affecting its siblings:
//!
//! 1. [`twix`]: locate the imaging measurement, parse protocol buffers,
//!    decode acquisition records
//! 2. [`classify`]: decide the scan category from protocol markers and
//!    record flags
//! 3. [`normalize`]: map vendor loop counters onto a dense MRD encoding
//!    space, resolving duplicates and counter wrap-around
//! 4. [`metadata`]: fill the ISMRMRD header and acquisition headers from the
//!    protocol and subject settings
//! 5. [`mrd`]: write the MRD stream in canonical order
//!
//! [`convert`] drives the stages per file and collects a
//! [`ConversionSummary`](convert::ConversionSummary); [`config`] resolves
//! the layered per-category settings; [`discover`] lists candidate inputs.
//!
//! ## Reading MRD Files
//!
//! The output is standard MRD and can be read with any ISMRMRD-compatible
//! tool, or with [`mrd::read_dataset`]:
//!
//! ```rust,no_run
//! use twix2mrd::mrd::read_dataset;
//!
//! let dataset = read_dataset("007-005B_dixon.mrd")?;
//! println!("{} acquisitions", dataset.acquisitions().len());
//! # Ok::<(), twix2mrd::mrd::MrdError>(())
//! ```

#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod classify;
pub mod config;
pub mod convert;
pub mod discover;
pub mod metadata;
pub mod mrd;
pub mod normalize;
pub mod twix;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::classify::{classify, Classification, ClassifyError, ScanCategory};
    pub use crate::config::{CategorySettings, Settings, SubjectConfig};
    pub use crate::convert::{
        ConversionError, ConversionSummary, ConvertedFile, Converter, ErrorKind, FileOutcome,
        FileStatus,
    };
    pub use crate::discover::{discover, DiscoveredFile};
    pub use crate::metadata::{map_acquisitions, map_header, MetadataError, ScanParameters};
    pub use crate::mrd::{read_dataset, write_dataset, Acquisition, MrdDataset, MrdError, MrdHeader};
    pub use crate::normalize::{normalize, NormalizeError, NormalizeOptions, NormalizedScan};
    pub use crate::twix::{FormatVersion, ProtocolHeader, RawRecord, TwixError, TwixFile};
}
