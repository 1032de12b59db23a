//! MRD stream reader.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use num_complex::Complex32;

use super::acquisition::{Acquisition, AcquisitionHeader};
use super::error::MrdError;
use super::header::MrdHeader;
use super::writer::{MrdDataset, MESSAGE_ACQUISITION, MESSAGE_CLOSE, MESSAGE_HEADER};
use super::xml;

/// Largest XML header accepted
const MAX_HEADER_BYTES: u32 = 64 * 1024 * 1024;

/// Streaming reader for files produced by [`super::MrdWriter`]
pub struct MrdReader<R: Read> {
    inner: R,
    header: MrdHeader,
    closed: bool,
    read: usize,
}

impl MrdReader<BufReader<File>> {
    /// Open a file and read its header
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MrdError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> MrdReader<R> {
    /// Read the header message from `inner`
    pub fn new(mut inner: R) -> Result<Self, MrdError> {
        let id = inner.read_u16::<LittleEndian>()?;
        if id != MESSAGE_HEADER {
            return Err(MrdError::InvalidStream(format!(
                "expected header message, found id {id}"
            )));
        }
        let length = inner.read_u32::<LittleEndian>()?;
        if length > MAX_HEADER_BYTES {
            return Err(MrdError::InvalidStream(format!(
                "header length {length} exceeds limit"
            )));
        }
        let mut bytes = vec![0u8; length as usize];
        inner.read_exact(&mut bytes)?;
        let text = String::from_utf8(bytes).map_err(MrdError::xml)?;
        let header = xml::from_xml(&text)?;

        Ok(Self {
            inner,
            header,
            closed: false,
            read: 0,
        })
    }

    /// Parsed XML header
    pub fn header(&self) -> &MrdHeader {
        &self.header
    }

    /// Whether the close message has been read
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn read_acquisition(&mut self) -> Result<Option<Acquisition>, MrdError> {
        let id = self.inner.read_u16::<LittleEndian>()?;
        match id {
            MESSAGE_CLOSE => {
                self.closed = true;
                Ok(None)
            }
            MESSAGE_ACQUISITION => {
                let header = AcquisitionHeader::read_from(&mut self.inner)?;
                let samples = usize::from(header.number_of_samples);
                let mut trajectory = vec![0f32; samples * usize::from(header.trajectory_dimensions)];
                self.inner.read_f32_into::<LittleEndian>(&mut trajectory)?;

                let mut raw = vec![0f32; 2 * samples * usize::from(header.active_channels)];
                self.inner.read_f32_into::<LittleEndian>(&mut raw)?;
                let data = raw
                    .chunks_exact(2)
                    .map(|pair| Complex32::new(pair[0], pair[1]))
                    .collect();

                self.read += 1;
                Ok(Some(Acquisition {
                    header,
                    trajectory,
                    data,
                }))
            }
            other => Err(MrdError::InvalidStream(format!(
                "unexpected message id {other} after {} acquisitions",
                self.read
            ))),
        }
    }

    /// Read every remaining acquisition up to the close message
    pub fn into_dataset(self) -> Result<MrdDataset, MrdError> {
        let mut reader = self;
        let mut acquisitions = Vec::new();
        for acquisition in reader.by_ref() {
            acquisitions.push(acquisition?);
        }
        if !reader.closed {
            return Err(MrdError::InvalidStream("missing close message".to_string()));
        }
        Ok(MrdDataset::new(reader.header, acquisitions))
    }
}

impl<R: Read> Iterator for MrdReader<R> {
    type Item = Result<Acquisition, MrdError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        match self.read_acquisition() {
            Ok(Some(acquisition)) => Some(Ok(acquisition)),
            Ok(None) => None,
            Err(e) => {
                // stop after the first framing error
                self.closed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read a complete MRD file
pub fn read_dataset(path: impl AsRef<Path>) -> Result<MrdDataset, MrdError> {
    MrdReader::open(path)?.into_dataset()
}
