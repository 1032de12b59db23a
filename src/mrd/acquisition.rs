//! MRD acquisitions and their fixed 340-byte header.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_complex::Complex32;

/// Acquisition header flag bits (`1 << (bit - 1)`)
pub mod flags {
    const fn bit(n: u32) -> u64 {
        1 << (n - 1)
    }

    /// Noise measurement
    pub const IS_NOISE_MEASUREMENT: u64 = bit(19);
    /// Parallel imaging calibration
    pub const IS_PARALLEL_CALIBRATION: u64 = bit(20);
    /// Parallel imaging calibration also used for imaging
    pub const IS_PARALLEL_CALIBRATION_AND_IMAGING: u64 = bit(21);
    /// Readout acquired in reverse
    pub const IS_REVERSE: u64 = bit(22);
    /// Phase correction data
    pub const IS_PHASECORR_DATA: u64 = bit(24);
    /// Last acquisition of the measurement
    pub const LAST_IN_MEASUREMENT: u64 = bit(25);
    /// High-performance feedback data
    pub const IS_HPFEEDBACK_DATA: u64 = bit(26);
    /// Real-time feedback data
    pub const IS_RTFEEDBACK_DATA: u64 = bit(28);
}

/// Size of [`AcquisitionHeader`] on the wire
pub const ACQUISITION_HEADER_SIZE: usize = 340;
/// Acquisition header version written by this crate
pub const ACQUISITION_HEADER_VERSION: u16 = 1;

/// `idx` block of the acquisition header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EncodingCounters {
    /// Phase encoding step
    pub kspace_encode_step_1: u16,
    /// Partition encoding step
    pub kspace_encode_step_2: u16,
    /// Average
    pub average: u16,
    /// Slice
    pub slice: u16,
    /// Contrast
    pub contrast: u16,
    /// Phase
    pub phase: u16,
    /// Repetition
    pub repetition: u16,
    /// Set
    pub set: u16,
    /// Segment
    pub segment: u16,
    /// Free counters
    pub user: [u16; 8],
}

/// Fixed-size acquisition header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionHeader {
    /// Header layout version
    pub version: u16,
    /// Flag bits, see [`flags`]
    pub flags: u64,
    /// Measurement UID
    pub measurement_uid: u32,
    /// Scan counter
    pub scan_counter: u32,
    /// Acquisition time stamp
    pub acquisition_time_stamp: u32,
    /// Physiology time stamps
    pub physiology_time_stamp: [u32; 3],
    /// Samples per channel
    pub number_of_samples: u16,
    /// Channels available on the system
    pub available_channels: u16,
    /// Channels stored in this acquisition
    pub active_channels: u16,
    /// Bitmask of active channels
    pub channel_mask: [u64; 16],
    /// Samples to discard at the start
    pub discard_pre: u16,
    /// Samples to discard at the end
    pub discard_post: u16,
    /// Sample at the k-space centre
    pub center_sample: u16,
    /// Index into the header's encodings
    pub encoding_space_ref: u16,
    /// Trajectory values per sample
    pub trajectory_dimensions: u16,
    /// Dwell time in µs
    pub sample_time_us: f32,
    /// Slice position in mm
    pub position: [f32; 3],
    /// Readout direction cosine
    pub read_dir: [f32; 3],
    /// Phase direction cosine
    pub phase_dir: [f32; 3],
    /// Slice direction cosine
    pub slice_dir: [f32; 3],
    /// Patient table position in mm
    pub patient_table_position: [f32; 3],
    /// Encoding counters
    pub idx: EncodingCounters,
    /// Free integer parameters
    pub user_int: [i32; 8],
    /// Free float parameters
    pub user_float: [f32; 8],
}

impl Default for AcquisitionHeader {
    fn default() -> Self {
        Self {
            version: ACQUISITION_HEADER_VERSION,
            flags: 0,
            measurement_uid: 0,
            scan_counter: 0,
            acquisition_time_stamp: 0,
            physiology_time_stamp: [0; 3],
            number_of_samples: 0,
            available_channels: 0,
            active_channels: 0,
            channel_mask: [0; 16],
            discard_pre: 0,
            discard_post: 0,
            center_sample: 0,
            encoding_space_ref: 0,
            trajectory_dimensions: 0,
            sample_time_us: 0.0,
            position: [0.0; 3],
            read_dir: [1.0, 0.0, 0.0],
            phase_dir: [0.0, 1.0, 0.0],
            slice_dir: [0.0, 0.0, 1.0],
            patient_table_position: [0.0; 3],
            idx: EncodingCounters::default(),
            user_int: [0; 8],
            user_float: [0.0; 8],
        }
    }
}

impl AcquisitionHeader {
    /// Whether all bits of `flag` are set
    pub fn is_flag_set(&self, flag: u64) -> bool {
        self.flags & flag == flag
    }

    /// Set the bits of `flag`
    pub fn set_flag(&mut self, flag: u64) {
        self.flags |= flag;
    }

    /// Clear the bits of `flag`
    pub fn clear_flag(&mut self, flag: u64) {
        self.flags &= !flag;
    }

    /// Mark channels `0..count` active in the channel mask
    pub fn set_channel_mask(&mut self, count: u16) {
        self.channel_mask = [0; 16];
        for channel in 0..usize::from(count).min(1024) {
            self.channel_mask[channel / 64] |= 1 << (channel % 64);
        }
    }

    /// Serialize in wire order
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.flags)?;
        w.write_u32::<LittleEndian>(self.measurement_uid)?;
        w.write_u32::<LittleEndian>(self.scan_counter)?;
        w.write_u32::<LittleEndian>(self.acquisition_time_stamp)?;
        for v in self.physiology_time_stamp {
            w.write_u32::<LittleEndian>(v)?;
        }
        w.write_u16::<LittleEndian>(self.number_of_samples)?;
        w.write_u16::<LittleEndian>(self.available_channels)?;
        w.write_u16::<LittleEndian>(self.active_channels)?;
        for v in self.channel_mask {
            w.write_u64::<LittleEndian>(v)?;
        }
        w.write_u16::<LittleEndian>(self.discard_pre)?;
        w.write_u16::<LittleEndian>(self.discard_post)?;
        w.write_u16::<LittleEndian>(self.center_sample)?;
        w.write_u16::<LittleEndian>(self.encoding_space_ref)?;
        w.write_u16::<LittleEndian>(self.trajectory_dimensions)?;
        w.write_f32::<LittleEndian>(self.sample_time_us)?;
        for v in self
            .position
            .iter()
            .chain(&self.read_dir)
            .chain(&self.phase_dir)
            .chain(&self.slice_dir)
            .chain(&self.patient_table_position)
        {
            w.write_f32::<LittleEndian>(*v)?;
        }
        let idx = &self.idx;
        for v in [
            idx.kspace_encode_step_1,
            idx.kspace_encode_step_2,
            idx.average,
            idx.slice,
            idx.contrast,
            idx.phase,
            idx.repetition,
            idx.set,
            idx.segment,
        ]
        .iter()
        .chain(&idx.user)
        {
            w.write_u16::<LittleEndian>(*v)?;
        }
        for v in self.user_int {
            w.write_i32::<LittleEndian>(v)?;
        }
        for v in self.user_float {
            w.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    /// Deserialize from wire order
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut h = Self {
            version: r.read_u16::<LittleEndian>()?,
            flags: r.read_u64::<LittleEndian>()?,
            measurement_uid: r.read_u32::<LittleEndian>()?,
            scan_counter: r.read_u32::<LittleEndian>()?,
            acquisition_time_stamp: r.read_u32::<LittleEndian>()?,
            ..Self::default()
        };
        for v in &mut h.physiology_time_stamp {
            *v = r.read_u32::<LittleEndian>()?;
        }
        h.number_of_samples = r.read_u16::<LittleEndian>()?;
        h.available_channels = r.read_u16::<LittleEndian>()?;
        h.active_channels = r.read_u16::<LittleEndian>()?;
        for v in &mut h.channel_mask {
            *v = r.read_u64::<LittleEndian>()?;
        }
        h.discard_pre = r.read_u16::<LittleEndian>()?;
        h.discard_post = r.read_u16::<LittleEndian>()?;
        h.center_sample = r.read_u16::<LittleEndian>()?;
        h.encoding_space_ref = r.read_u16::<LittleEndian>()?;
        h.trajectory_dimensions = r.read_u16::<LittleEndian>()?;
        h.sample_time_us = r.read_f32::<LittleEndian>()?;
        for vector in [
            &mut h.position,
            &mut h.read_dir,
            &mut h.phase_dir,
            &mut h.slice_dir,
            &mut h.patient_table_position,
        ] {
            for v in vector.iter_mut() {
                *v = r.read_f32::<LittleEndian>()?;
            }
        }
        let mut counters = [0u16; 9];
        for v in &mut counters {
            *v = r.read_u16::<LittleEndian>()?;
        }
        let [k1, k2, average, slice, contrast, phase, repetition, set, segment] = counters;
        h.idx = EncodingCounters {
            kspace_encode_step_1: k1,
            kspace_encode_step_2: k2,
            average,
            slice,
            contrast,
            phase,
            repetition,
            set,
            segment,
            user: [0; 8],
        };
        for v in &mut h.idx.user {
            *v = r.read_u16::<LittleEndian>()?;
        }
        for v in &mut h.user_int {
            *v = r.read_i32::<LittleEndian>()?;
        }
        for v in &mut h.user_float {
            *v = r.read_f32::<LittleEndian>()?;
        }
        Ok(h)
    }

    /// Writer sort key: repetition, slice, contrast, phase, segment, set
    pub fn order_key(&self) -> (u16, u16, u16, u16, u16, u16) {
        let idx = &self.idx;
        (
            idx.repetition,
            idx.slice,
            idx.contrast,
            idx.phase,
            idx.segment,
            idx.set,
        )
    }
}

/// One readout: header, optional trajectory and channel-major samples
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Fixed header
    pub header: AcquisitionHeader,
    /// `trajectory_dimensions × number_of_samples` values
    pub trajectory: Vec<f32>,
    /// `active_channels × number_of_samples` samples, channel-major
    pub data: Vec<Complex32>,
}

impl Acquisition {
    /// Build an acquisition from per-channel sample vectors, filling the
    /// sample and channel counts of `header`.
    ///
    /// Returns `None` when the channels differ in length or exceed the
    /// header field widths.
    pub fn from_channels(mut header: AcquisitionHeader, channels: Vec<Vec<Complex32>>) -> Option<Self> {
        let samples = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != samples) {
            return None;
        }
        header.number_of_samples = u16::try_from(samples).ok()?;
        header.active_channels = u16::try_from(channels.len()).ok()?;
        if header.available_channels < header.active_channels {
            header.available_channels = header.active_channels;
        }
        header.set_channel_mask(header.active_channels);
        header.trajectory_dimensions = 0;
        Some(Self {
            header,
            trajectory: Vec::new(),
            data: channels.into_iter().flatten().collect(),
        })
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> Option<&[Complex32]> {
        let n = usize::from(self.header.number_of_samples);
        if index >= usize::from(self.header.active_channels) {
            return None;
        }
        self.data.get(index * n..(index + 1) * n)
    }

    /// Whether data and trajectory lengths match the header counts
    pub fn is_consistent(&self) -> bool {
        let n = usize::from(self.header.number_of_samples);
        self.data.len() == n * usize::from(self.header.active_channels)
            && self.trajectory.len() == n * usize::from(self.header.trajectory_dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> AcquisitionHeader {
        let mut header = AcquisitionHeader {
            flags: flags::IS_REVERSE | flags::LAST_IN_MEASUREMENT,
            scan_counter: 17,
            sample_time_us: 10.0,
            position: [1.0, -2.5, 3.0],
            user_int: [1, -2, 3, 4, 5, 6, 7, 8],
            ..AcquisitionHeader::default()
        };
        header.idx.repetition = 4;
        header.idx.contrast = 2;
        header.idx.user[7] = 9;
        header
    }

    #[test]
    fn test_header_is_340_bytes() {
        let mut buf = Vec::new();
        sample_header().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), ACQUISITION_HEADER_SIZE);
    }

    #[test]
    fn test_header_fields_read_back() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let read = AcquisitionHeader::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(read, header);
        assert!(read.is_flag_set(flags::IS_REVERSE));
        assert!(!read.is_flag_set(flags::IS_NOISE_MEASUREMENT));
    }

    #[test]
    fn test_flag_bits_follow_schema_numbering() {
        assert_eq!(flags::IS_NOISE_MEASUREMENT, 1 << 18);
        assert_eq!(flags::LAST_IN_MEASUREMENT, 1 << 24);
        assert_eq!(flags::IS_RTFEEDBACK_DATA, 1 << 27);
    }

    #[test]
    fn test_from_channels_is_channel_major() {
        let a = vec![Complex32::new(1.0, 0.0), Complex32::new(2.0, 0.0)];
        let b = vec![Complex32::new(3.0, 0.0), Complex32::new(4.0, 0.0)];
        let acq = Acquisition::from_channels(AcquisitionHeader::default(), vec![a.clone(), b.clone()]).unwrap();

        assert_eq!(acq.header.number_of_samples, 2);
        assert_eq!(acq.header.active_channels, 2);
        assert_eq!(acq.header.channel_mask[0], 0b11);
        assert_eq!(acq.channel(0), Some(a.as_slice()));
        assert_eq!(acq.channel(1), Some(b.as_slice()));
        assert_eq!(acq.channel(2), None);
        assert!(acq.is_consistent());

        assert!(Acquisition::from_channels(AcquisitionHeader::default(), vec![a, vec![]]).is_none());
    }
}
