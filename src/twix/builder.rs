//! Synthetic twix files.
//!
//! Produces byte-exact VB and VD containers from [`RawRecord`]s and protocol
//! key/value pairs. Used by the test suite, benchmarks and the fuzz target.
//!
//! ```
//! use twix2mrd::twix::builder::{synthetic_record, TwixBuilder};
//! use twix2mrd::twix::{FormatVersion, LoopCounters, TwixFile};
//!
//! let bytes = TwixBuilder::new(FormatVersion::Vd)
//!     .xprot("Config", "ProtocolName", "xe_calibration")
//!     .yaps("lRepetitions", "0")
//!     .record(synthetic_record(1, LoopCounters::default(), 2, 16))
//!     .build();
//!
//! let twix = TwixFile::from_bytes(bytes).unwrap();
//! assert_eq!(twix.records().count(), 1);
//! ```

use std::io::{self, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use num_complex::Complex32;

use super::header::{RAID_ENTRY_COUNT, RAID_ENTRY_SIZE, RAID_HEADER_SIZE};
use super::layout::{
    FormatVersion, RecordLayout, FLAGS_AND_DMA, MEASUREMENT_UID, PMU_TIMESTAMP, SCAN_COUNTER,
    TIMESTAMP,
};
use super::record::{ChannelData, EvalInfoMask, LoopCounters, RawRecord, RecordHeader};
use crate::classify::ScanCategory;

/// Builder for synthetic twix files
#[derive(Debug, Clone)]
pub struct TwixBuilder {
    version: FormatVersion,
    xprot: Vec<(String, String, String)>,
    yaps: Vec<(String, String)>,
    raw_buffers: Vec<(String, String)>,
    items: Vec<Item>,
    acq_end: bool,
    adjustment_scans: usize,
}

#[derive(Debug, Clone)]
enum Item {
    Record(RawRecord),
    Sync(usize),
}

impl TwixBuilder {
    /// Empty file in the given layout
    pub fn new(version: FormatVersion) -> Self {
        Self {
            version,
            xprot: Vec::new(),
            yaps: Vec::new(),
            raw_buffers: Vec::new(),
            items: Vec::new(),
            acq_end: true,
            adjustment_scans: 0,
        }
    }

    /// Add an XProtocol parameter to a buffer (`Config`, `Dicom`, `Meas`)
    pub fn xprot(mut self, buffer: &str, name: &str, value: &str) -> Self {
        self.xprot
            .push((buffer.to_string(), name.to_string(), value.to_string()));
        self
    }

    /// Add an ASCCONV assignment to `MeasYaps`
    pub fn yaps(mut self, key: &str, value: &str) -> Self {
        self.yaps.push((key.to_string(), value.to_string()));
        self
    }

    /// Replace a generated buffer with literal text
    pub fn raw_buffer(mut self, name: &str, text: &str) -> Self {
        self.raw_buffers.retain(|(n, _)| n != name);
        self.raw_buffers.push((name.to_string(), text.to_string()));
        self
    }

    /// Append an acquisition record
    pub fn record(mut self, record: RawRecord) -> Self {
        self.items.push(Item::Record(record));
        self
    }

    /// Append several acquisition records
    pub fn records(mut self, records: impl IntoIterator<Item = RawRecord>) -> Self {
        self.items.extend(records.into_iter().map(Item::Record));
        self
    }

    /// Append a SYNCDATA record with `payload` bytes after its header
    pub fn sync_data(mut self, payload: usize) -> Self {
        self.items.push(Item::Sync(payload));
        self
    }

    /// Omit the trailing ACQEND record
    pub fn without_acq_end(mut self) -> Self {
        self.acq_end = false;
        self
    }

    /// Prepend empty adjustment measurements (VD only)
    pub fn adjustment_scans(mut self, count: usize) -> Self {
        self.adjustment_scans = count;
        self
    }

    /// Serialize the file
    pub fn build(&self) -> Vec<u8> {
        let imaging = self.measurement(&self.buffers(), true);
        match self.version {
            FormatVersion::Vb => imaging,
            FormatVersion::Vd => {
                let adjustment = self.measurement(&[("Config".to_string(), String::new())], false);
                let mut measurements = vec![adjustment; self.adjustment_scans.min(RAID_ENTRY_COUNT - 1)];
                measurements.push(imaging);
                raid_file(measurements)
            }
        }
    }

    /// Serialize the file to `path`
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.build())
    }

    fn buffers(&self) -> Vec<(String, String)> {
        let mut buffers = Vec::new();
        for name in ["Config", "Dicom", "Meas"] {
            let params: Vec<String> = self
                .xprot
                .iter()
                .filter(|(buffer, _, _)| buffer == name)
                .map(|(_, key, value)| xprot_param(key, value))
                .collect();
            buffers.push((
                name.to_string(),
                format!("<XProtocol>\n{{\n{}\n}}\n", params.join("\n")),
            ));
        }

        let mut yaps = String::from("### ASCCONV BEGIN object=MrProtDataImpl@MrProtocolData ###\n");
        for (key, value) in &self.yaps {
            yaps.push_str(&ascconv_line(key, value));
        }
        yaps.push_str("### ASCCONV END ###\n");
        buffers.push(("MeasYaps".to_string(), yaps));

        for (name, text) in &self.raw_buffers {
            match buffers.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = text.clone(),
                None => buffers.push((name.clone(), text.clone())),
            }
        }
        buffers
    }

    fn measurement(&self, buffers: &[(String, String)], with_records: bool) -> Vec<u8> {
        let mut out = header_block(buffers);
        if with_records {
            for item in &self.items {
                match item {
                    Item::Record(record) => self.write_record(&mut out, record),
                    Item::Sync(payload) => self.write_sync(&mut out, *payload),
                }
            }
        }
        if self.acq_end || !with_records {
            let layout = self.version.layout();
            let mut head = vec![0u8; layout.scan_header_len];
            put_dma(&mut head, layout.scan_header_len);
            LittleEndian::write_u64(&mut head[layout.eval_mask..], EvalInfoMask::ACQEND);
            out.extend_from_slice(&head);
        }
        out
    }

    fn write_record(&self, out: &mut Vec<u8>, record: &RawRecord) {
        let layout = self.version.layout();
        let len = self
            .version
            .record_len(record.channel_count(), record.sample_count());
        let mut head = vec![0u8; layout.scan_header_len];
        scan_header(&mut head, layout, record.header(), len);

        if !layout.scan_header_is_channel_header {
            out.extend_from_slice(&head);
        }
        for channel in record.channels() {
            let mut channel_header = if layout.scan_header_is_channel_header {
                head.clone()
            } else {
                vec![0u8; layout.channel_header_len]
            };
            LittleEndian::write_u16(&mut channel_header[layout.channel_id..], channel.id);
            out.extend_from_slice(&channel_header);
            for sample in &channel.samples {
                // writes to a Vec cannot fail
                let _ = out.write_f32::<LittleEndian>(sample.re);
                let _ = out.write_f32::<LittleEndian>(sample.im);
            }
        }
    }

    fn write_sync(&self, out: &mut Vec<u8>, payload: usize) {
        let layout = self.version.layout();
        let len = layout.scan_header_len + payload;
        let mut head = vec![0u8; layout.scan_header_len];
        put_dma(&mut head, len);
        LittleEndian::write_u64(&mut head[layout.eval_mask..], EvalInfoMask::SYNCDATA);
        out.extend_from_slice(&head);
        out.extend(std::iter::repeat(0xA5u8).take(payload));
    }
}

fn put_dma(head: &mut [u8], len: usize) {
    LittleEndian::write_u32(&mut head[FLAGS_AND_DMA..], (len as u32) & 0x01FF_FFFF);
}

fn scan_header(head: &mut [u8], layout: &RecordLayout, header: &RecordHeader, len: usize) {
    put_dma(head, len);
    LittleEndian::write_u32(&mut head[MEASUREMENT_UID..], header.measurement_uid);
    LittleEndian::write_u32(&mut head[SCAN_COUNTER..], header.scan_counter);
    LittleEndian::write_u32(&mut head[TIMESTAMP..], header.timestamp);
    LittleEndian::write_u32(&mut head[PMU_TIMESTAMP..], header.pmu_timestamp);
    LittleEndian::write_u64(&mut head[layout.eval_mask..], header.eval_mask.0);
    LittleEndian::write_u16(&mut head[layout.samples..], header.samples);
    LittleEndian::write_u16(&mut head[layout.channels..], header.channels);
    for (i, value) in header.counters.to_array().iter().enumerate() {
        LittleEndian::write_u16(&mut head[layout.loop_counters + i * 2..], *value);
    }
    LittleEndian::write_u16(&mut head[layout.cutoff..], header.cutoff_pre);
    LittleEndian::write_u16(&mut head[layout.cutoff + 2..], header.cutoff_post);
    LittleEndian::write_u16(&mut head[layout.centre_column..], header.centre_column);
    LittleEndian::write_u16(&mut head[layout.centre_line..], header.centre_line);
    LittleEndian::write_u16(&mut head[layout.centre_partition..], header.centre_partition);
    for (i, value) in header.slice_position.iter().enumerate() {
        LittleEndian::write_f32(&mut head[layout.slice_position + i * 4..], *value);
    }
}

fn header_block(buffers: &[(String, String)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, text) in buffers {
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        let bytes = latin1_bytes(text);
        body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(&bytes);
    }
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&((body.len() + 8) as u32).to_le_bytes());
    out.extend_from_slice(&(buffers.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn raid_file(measurements: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = vec![0u8; RAID_HEADER_SIZE];
    LittleEndian::write_u32(&mut out[4..], measurements.len() as u32);

    let mut offset = RAID_HEADER_SIZE;
    for (slot, measurement) in measurements.iter().enumerate() {
        let entry = &mut out[8 + slot * RAID_ENTRY_SIZE..8 + (slot + 1) * RAID_ENTRY_SIZE];
        LittleEndian::write_u32(&mut entry[0..], slot as u32 + 1);
        LittleEndian::write_u32(&mut entry[4..], slot as u32 + 100);
        LittleEndian::write_u64(&mut entry[8..], offset as u64);
        LittleEndian::write_u64(&mut entry[16..], measurement.len() as u64);
        let name = b"SYNTHETIC";
        entry[24..24 + name.len()].copy_from_slice(name);
        let protocol = if slot + 1 == measurements.len() {
            &b"imaging"[..]
        } else {
            &b"AdjCoilSens"[..]
        };
        entry[88..88 + protocol.len()].copy_from_slice(protocol);
        offset += measurement.len();
    }

    let mut file = out;
    for measurement in measurements {
        // writes to a Vec cannot fail
        let _ = file.write_all(&measurement);
    }
    file
}

fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn is_numeric_list(value: &str) -> bool {
    !value.trim().is_empty() && value.split_whitespace().all(|t| t.parse::<f64>().is_ok())
}

/// Render one XProtocol parameter
pub fn xprot_param(name: &str, value: &str) -> String {
    if is_numeric_list(value) {
        let kind = if value.split_whitespace().all(|t| t.parse::<i64>().is_ok()) {
            "ParamLong"
        } else {
            "ParamDouble"
        };
        format!("  <{kind}.\"{name}\">  {{ {value}  }}")
    } else {
        format!("  <ParamString.\"{name}\">  {{ \"{value}\"  }}")
    }
}

/// Render one ASCCONV assignment line
pub fn ascconv_line(key: &str, value: &str) -> String {
    if is_numeric_list(value) || value.starts_with("0x") {
        format!("{key}\t = {value}\n")
    } else {
        format!("{key}\t = \"\"{value}\"\"\n")
    }
}

/// Deterministic record with `channels` × `samples` samples.
///
/// Sample values encode the scan counter, channel and sample position so
/// reordering and channel mix-ups are visible in tests.
pub fn synthetic_record(
    scan_counter: u32,
    counters: LoopCounters,
    channels: u16,
    samples: u16,
) -> RawRecord {
    flagged_record(scan_counter, counters, channels, samples, 0)
}

/// [`synthetic_record`] with evaluation flags set
pub fn flagged_record(
    scan_counter: u32,
    counters: LoopCounters,
    channels: u16,
    samples: u16,
    flags: u64,
) -> RawRecord {
    let data = (0..channels.max(1))
        .map(|ch| ChannelData {
            id: ch,
            samples: (0..samples.max(1))
                .map(|i| Complex32::new(scan_counter as f32, f32::from(ch) * 1000.0 + f32::from(i)))
                .collect(),
        })
        .collect();
    let header = RecordHeader {
        measurement_uid: 42,
        scan_counter,
        timestamp: 1000 + scan_counter * 4,
        pmu_timestamp: scan_counter,
        eval_mask: EvalInfoMask(flags),
        counters,
        centre_column: samples / 2,
        ..RecordHeader::default()
    };
    match RawRecord::new(header, data) {
        Some(record) => record,
        None => unreachable!("uniform channels by construction"),
    }
}

/// Representative consortium scan of one category.
///
/// The protocol carries everything the converter maps (scan date, system,
/// timing, flip angles) and the records form a dense encoding space:
///
/// - calibration: 30 single-channel FIDs, the trailing 20 of them gas
/// - Dixon: one noise scan, then 8 radial projections with alternating
///   gas/dissolved readouts
/// - proton: 8 four-channel projections
pub fn consortium_scan(category: ScanCategory, version: FormatVersion) -> TwixBuilder {
    let software = match version {
        FormatVersion::Vb => "syngo MR B17",
        FormatVersion::Vd => "syngo MR E11",
    };
    let builder = TwixBuilder::new(version)
        .xprot("Dicom", "SoftwareVersions", software)
        .xprot("Dicom", "Manufacturer", "SIEMENS")
        .xprot("Dicom", "ManufacturersModelName", "Prisma")
        .xprot("Dicom", "InstitutionName", "Consortium Site")
        .xprot("Dicom", "flMagneticFieldStrength", "2.89362")
        .xprot("Config", "ReadFoV", "400")
        .xprot("Meas", "RORampTime", "120")
        .yaps("tReferenceImage0", "1.3.12.2.1107.5.2.43.20210601143012")
        .yaps("sRXSPEC.alDwellTime[0]", "10000")
        .yaps("alTR[0]", "15000")
        .yaps("alTE[0]", "450");

    let line = |i: u16| LoopCounters {
        line: i,
        ..LoopCounters::default()
    };
    match category {
        ScanCategory::Calibration => builder
            .xprot("Config", "ProtocolName", "Xe_cali")
            .xprot("Dicom", "lFrequency", "34081645")
            .yaps("tSequenceFileName", "%CustomerSeq%\\fid_xe_calibration_2101")
            .yaps("sWipMemBlock.alFree[4]", "7340")
            .yaps("adFlipAngleDegree[0]", "20")
            .records((0..30u16).map(|i| synthetic_record(u32::from(i) + 1, line(i), 1, 64))),
        ScanCategory::Dixon => builder
            .xprot("Config", "ProtocolName", "xe_radial_Dixon")
            .xprot("Dicom", "lFrequency", "34081645")
            .xprot("Meas", "adFlipAngleDegree", "0.5 20")
            .yaps("tSequenceFileName", "%CustomerSeq%\\xe_radial_Dixon_2101")
            .yaps("sWipMemBlock.alFree[4]", "7340")
            .yaps("adFlipAngleDegree[0]", "0.5")
            .yaps("adFlipAngleDegree[1]", "20")
            .record(flagged_record(
                1,
                LoopCounters::default(),
                1,
                64,
                EvalInfoMask::NOISEADJSCAN,
            ))
            .records((0..16u16).map(|i| synthetic_record(u32::from(i) + 2, line(i / 2), 1, 64))),
        ScanCategory::Proton => builder
            .xprot("Config", "ProtocolName", "1H_BHUTE_Radial")
            .xprot("Dicom", "lFrequency", "123251815")
            .xprot("Meas", "adFlipAngleDegree", "5")
            .yaps("tSequenceFileName", "%CustomerSeq%\\1H_BHUTE_Radial")
            .yaps("lContrasts", "1")
            .records((0..8u16).map(|i| synthetic_record(u32::from(i) + 1, line(i), 4, 64))),
    }
}
