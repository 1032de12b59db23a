//! Container and measurement header parsing.
//!
//! Two container shapes exist in the wild:
//!
//! ```text
//! single-RAID (VB)                 multi-RAID (VD/VE)
//! ┌──────────────────────┐         ┌──────────────────────────────┐
//! │ u32 header_length    │         │ u32 0, u32 count             │
//! │ u32 n_buffers        │         │ 64 × 152-byte entries        │
//! │ buffers...           │         ├──────────────────────────────┤
//! ├──────────────────────┤         │ measurement 0 (adjustments)  │
//! │ records...           │         │ ...                          │
//! └──────────────────────┘         │ measurement n-1 (imaging)    │
//!                                  └──────────────────────────────┘
//! ```
//!
//! Every measurement starts with the same header block; records follow at
//! `measurement_offset + header_length`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use super::error::TwixError;

/// Number of measurement slots in a multi-RAID file header
pub const RAID_ENTRY_COUNT: usize = 64;
/// Size of one multi-RAID slot
pub const RAID_ENTRY_SIZE: usize = 152;
/// Total size of the multi-RAID file header
pub const RAID_HEADER_SIZE: usize = 8 + RAID_ENTRY_COUNT * RAID_ENTRY_SIZE;

const RAID_NAME_SIZE: usize = 64;
const MAX_BUFFER_NAME: usize = 64;
const MAX_BUFFERS: u32 = 64;

/// Which container shape the file uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// One measurement starting at byte 0 (VB software lines)
    SingleRaid,
    /// RAID file header followed by one or more measurements (VD/VE)
    MultiRaid,
}

/// One slot of the multi-RAID file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementEntry {
    /// Measurement id
    pub meas_id: u32,
    /// File id
    pub file_id: u32,
    /// Absolute offset of the measurement
    pub offset: u64,
    /// Length of the measurement in bytes
    pub length: u64,
    /// Patient name as stored by the scanner
    pub patient_name: String,
    /// Protocol name as stored by the scanner
    pub protocol_name: String,
}

/// One named text buffer of the measurement header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBuffer {
    /// Buffer name (`Config`, `Dicom`, `Meas`, `MeasYaps`, `Phoenix`, ...)
    pub name: String,
    /// Buffer contents decoded as Latin-1
    pub text: String,
}

/// Parsed measurement header and the byte range of its records
#[derive(Debug, Clone)]
pub struct MeasurementHeader {
    /// Container shape
    pub kind: ContainerKind,
    /// Selected RAID slot, for multi-RAID files
    pub entry: Option<MeasurementEntry>,
    /// Number of measurements in the file
    pub measurement_count: usize,
    /// Text buffers in file order
    pub buffers: Vec<HeaderBuffer>,
    /// Absolute offset of the first record
    pub data_offset: u64,
    /// Absolute end of this measurement's records
    pub data_end: u64,
}

/// Locate the imaging measurement and parse its header buffers.
///
/// For multi-RAID files the last measurement is selected; earlier ones hold
/// adjustment scans.
pub fn read_measurement_header(bytes: &[u8]) -> Result<MeasurementHeader, TwixError> {
    if bytes.len() < 8 {
        return Err(TwixError::malformed(format!(
            "file is {} bytes, shorter than any container header",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let first = cursor.read_u32::<LittleEndian>()?;
    let second = cursor.read_u32::<LittleEndian>()?;

    if first == 0 && (1..=RAID_ENTRY_COUNT as u32).contains(&second) {
        read_multi_raid(bytes, second as usize)
    } else {
        let (buffers, header_length) = read_buffers(bytes, 0, bytes.len() as u64)?;
        Ok(MeasurementHeader {
            kind: ContainerKind::SingleRaid,
            entry: None,
            measurement_count: 1,
            buffers,
            data_offset: header_length,
            data_end: bytes.len() as u64,
        })
    }
}

fn read_multi_raid(bytes: &[u8], count: usize) -> Result<MeasurementHeader, TwixError> {
    if bytes.len() < RAID_HEADER_SIZE {
        return Err(TwixError::malformed(format!(
            "multi-RAID header needs {} bytes, file has {}",
            RAID_HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for slot in 0..count {
        let start = 8 + slot * RAID_ENTRY_SIZE;
        let mut cursor = Cursor::new(&bytes[start..start + RAID_ENTRY_SIZE]);
        let meas_id = cursor.read_u32::<LittleEndian>()?;
        let file_id = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let length = cursor.read_u64::<LittleEndian>()?;
        let names = &bytes[start + 24..start + RAID_ENTRY_SIZE];
        entries.push(MeasurementEntry {
            meas_id,
            file_id,
            offset,
            length,
            patient_name: c_string(&names[..RAID_NAME_SIZE]),
            protocol_name: c_string(&names[RAID_NAME_SIZE..]),
        });
    }

    for entry in &entries[..count - 1] {
        debug!(
            "Skipping adjustment measurement {} ({})",
            entry.meas_id, entry.protocol_name
        );
    }

    // count >= 1 is guaranteed by the caller
    let entry = entries.pop().ok_or_else(|| TwixError::malformed("no measurements"))?;
    let file_len = bytes.len() as u64;
    let end = entry.offset.checked_add(entry.length);
    match end {
        Some(end) if entry.offset >= RAID_HEADER_SIZE as u64 && end <= file_len => {}
        _ => {
            return Err(TwixError::malformed(format!(
                "measurement {} spans bytes {}..{} but file has {} bytes",
                entry.meas_id,
                entry.offset,
                entry.offset.saturating_add(entry.length),
                file_len
            )));
        }
    }

    let data_end = entry.offset + entry.length;
    let (buffers, header_length) = read_buffers(bytes, entry.offset, data_end)?;

    Ok(MeasurementHeader {
        kind: ContainerKind::MultiRaid,
        measurement_count: count,
        data_offset: entry.offset + header_length,
        data_end,
        entry: Some(entry),
        buffers,
    })
}

/// Parse the buffer block at `start`, returning the buffers and the declared
/// header length.
fn read_buffers(bytes: &[u8], start: u64, end: u64) -> Result<(Vec<HeaderBuffer>, u64), TwixError> {
    if start + 8 > end {
        return Err(TwixError::malformed(format!(
            "measurement at byte {start} is too short for a header"
        )));
    }

    let base = start as usize;
    let mut cursor = Cursor::new(&bytes[base..base + 8]);
    let header_length = u64::from(cursor.read_u32::<LittleEndian>()?);
    let n_buffers = cursor.read_u32::<LittleEndian>()?;

    if header_length < 8 {
        return Err(TwixError::malformed(format!(
            "declared header length {header_length} is smaller than its own length fields"
        )));
    }
    if start + header_length > end {
        return Err(TwixError::malformed(format!(
            "declared header length {} exceeds file size {}",
            header_length, end
        )));
    }
    if n_buffers > MAX_BUFFERS {
        return Err(TwixError::malformed(format!(
            "header declares {n_buffers} buffers"
        )));
    }

    let header = &bytes[base..base + header_length as usize];
    let mut pos = 8usize;
    let mut buffers = Vec::with_capacity(n_buffers as usize);

    for index in 0..n_buffers {
        let name_limit = (pos + MAX_BUFFER_NAME).min(header.len());
        let nul = header[pos..name_limit]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| {
                TwixError::malformed(format!("buffer {index} name is not terminated"))
            })?;
        let name = latin1(&header[pos..pos + nul]);
        pos += nul + 1;

        if pos + 4 > header.len() {
            return Err(TwixError::malformed(format!(
                "buffer '{name}' length field overruns the header"
            )));
        }
        let mut cursor = Cursor::new(&header[pos..pos + 4]);
        let length = cursor.read_u32::<LittleEndian>()? as usize;
        pos += 4;

        if pos + length > header.len() {
            return Err(TwixError::malformed(format!(
                "buffer '{name}' declares {length} bytes, {} remain in the header",
                header.len() - pos
            )));
        }
        let text = latin1(&header[pos..pos + length]);
        pos += length;

        buffers.push(HeaderBuffer {
            name,
            text: text.trim_end_matches('\0').to_string(),
        });
    }

    Ok((buffers, header_length))
}

/// Decode Latin-1 bytes; every byte maps to the code point of the same value.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    latin1(&bytes[..end])
}
