//! MRD stream writer.
//!
//! Stream layout (all little-endian):
//!
//! ```text
//! u16 3    u32 len  <xml bytes>                         header, once
//! u16 1008 <340-byte header> <f32 trajectory> <f32 re,im data>   per acquisition
//! u16 4                                                 close
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};
use tempfile::NamedTempFile;

use super::acquisition::{flags, Acquisition};
use super::error::MrdError;
use super::header::MrdHeader;
use super::xml;

/// Header message id
pub const MESSAGE_HEADER: u16 = 3;
/// Close message id
pub const MESSAGE_CLOSE: u16 = 4;
/// Acquisition message id
pub const MESSAGE_ACQUISITION: u16 = 1008;

/// Header plus acquisitions in writer order.
///
/// Construction sorts acquisitions stably by repetition, slice, contrast,
/// phase, segment and set, and marks the final one `LAST_IN_MEASUREMENT`.
#[derive(Debug, Clone, PartialEq)]
pub struct MrdDataset {
    header: MrdHeader,
    acquisitions: Vec<Acquisition>,
}

impl MrdDataset {
    /// Order acquisitions and wrap them with their header
    pub fn new(header: MrdHeader, mut acquisitions: Vec<Acquisition>) -> Self {
        acquisitions.sort_by_key(|a| a.header.order_key());
        let count = acquisitions.len();
        for (i, acquisition) in acquisitions.iter_mut().enumerate() {
            if i + 1 == count {
                acquisition.header.set_flag(flags::LAST_IN_MEASUREMENT);
            } else {
                acquisition.header.clear_flag(flags::LAST_IN_MEASUREMENT);
            }
        }
        Self {
            header,
            acquisitions,
        }
    }

    /// XML header
    pub fn header(&self) -> &MrdHeader {
        &self.header
    }

    /// Acquisitions in stream order
    pub fn acquisitions(&self) -> &[Acquisition] {
        &self.acquisitions
    }

    /// Take header and acquisitions apart
    pub fn into_parts(self) -> (MrdHeader, Vec<Acquisition>) {
        (self.header, self.acquisitions)
    }
}

/// Streaming writer over any `Write`
pub struct MrdWriter<W: Write> {
    inner: W,
    header_written: bool,
    acquisitions_written: usize,
}

impl<W: Write> MrdWriter<W> {
    /// Wrap an output stream
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            header_written: false,
            acquisitions_written: 0,
        }
    }

    /// Write the header message; must precede all acquisitions
    pub fn write_header(&mut self, header: &MrdHeader) -> Result<(), MrdError> {
        if self.header_written {
            return Err(MrdError::InvalidStream("header already written".to_string()));
        }
        let xml = xml::to_xml(header)?;
        let length = u32::try_from(xml.len())
            .map_err(|_| MrdError::InvalidStream("XML header exceeds 4 GiB".to_string()))?;
        self.inner.write_u16::<LittleEndian>(MESSAGE_HEADER)?;
        self.inner.write_u32::<LittleEndian>(length)?;
        self.inner.write_all(xml.as_bytes())?;
        self.header_written = true;
        Ok(())
    }

    /// Write one acquisition message
    pub fn write_acquisition(&mut self, acquisition: &Acquisition) -> Result<(), MrdError> {
        if !self.header_written {
            return Err(MrdError::InvalidStream(
                "acquisition written before header".to_string(),
            ));
        }
        if !acquisition.is_consistent() {
            return Err(MrdError::InvalidAcquisition {
                index: self.acquisitions_written,
                reason: format!(
                    "{} samples and {} trajectory values for {} channels × {} samples",
                    acquisition.data.len(),
                    acquisition.trajectory.len(),
                    acquisition.header.active_channels,
                    acquisition.header.number_of_samples
                ),
            });
        }

        self.inner.write_u16::<LittleEndian>(MESSAGE_ACQUISITION)?;
        acquisition.header.write_to(&mut self.inner)?;
        for value in &acquisition.trajectory {
            self.inner.write_f32::<LittleEndian>(*value)?;
        }
        for sample in &acquisition.data {
            self.inner.write_f32::<LittleEndian>(sample.re)?;
            self.inner.write_f32::<LittleEndian>(sample.im)?;
        }
        self.acquisitions_written += 1;
        Ok(())
    }

    /// Number of acquisitions written so far
    pub fn acquisitions_written(&self) -> usize {
        self.acquisitions_written
    }

    /// Write the close message, flush and return the inner stream
    pub fn finish(mut self) -> Result<W, MrdError> {
        self.inner.write_u16::<LittleEndian>(MESSAGE_CLOSE)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Write a dataset to `path` atomically.
///
/// The stream goes to a temporary file in the target directory, which is
/// renamed over `path` only after the close message is flushed and synced.
/// On any error the temporary file is removed and `path` is left untouched.
pub fn write_dataset(path: impl AsRef<Path>, dataset: &MrdDataset) -> Result<PathBuf, MrdError> {
    let path = path.as_ref();
    let failure = |source: std::io::Error| MrdError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let temp = NamedTempFile::new_in(&dir).map_err(failure)?;
    debug!("Writing {} via {}", path.display(), temp.path().display());

    let file = temp.reopen().map_err(failure)?;
    let mut writer = MrdWriter::new(BufWriter::new(file));
    write_all(&mut writer, dataset).map_err(|e| match e {
        MrdError::IoError(source) => failure(source),
        other => other,
    })?;
    let buffered = writer.finish().map_err(|e| match e {
        MrdError::IoError(source) => failure(source),
        other => other,
    })?;
    let file: File = buffered.into_inner().map_err(|e| failure(e.into_error()))?;
    file.sync_all().map_err(failure)?;

    temp.persist(path).map_err(|e| failure(e.error))?;
    info!(
        "Wrote {} acquisitions to {}",
        dataset.acquisitions().len(),
        path.display()
    );
    Ok(path.to_path_buf())
}

fn write_all<W: Write>(writer: &mut MrdWriter<W>, dataset: &MrdDataset) -> Result<(), MrdError> {
    writer.write_header(dataset.header())?;
    for acquisition in dataset.acquisitions() {
        writer.write_acquisition(acquisition)?;
    }
    Ok(())
}
