//! Acquisition records and the lazy record decoder.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use num_complex::Complex32;

use super::error::TwixError;
use super::layout::{
    FormatVersion, DMA_LENGTH_MASK, FLAGS_AND_DMA, MEASUREMENT_UID, PMU_TIMESTAMP, SCAN_COUNTER,
    TIMESTAMP,
};

/// Upper bound on receive channels in one record
pub const MAX_CHANNELS: u16 = 128;
/// Upper bound on the payload of one record
pub const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;

/// Evaluation info mask flags of one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EvalInfoMask(pub u64);

impl EvalInfoMask {
    /// End of acquisition marker
    pub const ACQEND: u64 = 1 << 0;
    /// Real-time feedback (navigator) data
    pub const RTFEEDBACK: u64 = 1 << 1;
    /// High-performance feedback data
    pub const HPFEEDBACK: u64 = 1 << 2;
    /// Synchronisation data, not a readout
    pub const SYNCDATA: u64 = 1 << 5;
    /// Last scan of the measurement
    pub const LASTSCANINMEAS: u64 = 1 << 11;
    /// Phase correction scan
    pub const PHASCOR: u64 = 1 << 21;
    /// Parallel imaging reference scan
    pub const PATREFSCAN: u64 = 1 << 22;
    /// Reference scan that is also used for imaging
    pub const PATREFANDIMASCAN: u64 = 1 << 23;
    /// Readout acquired in reverse direction
    pub const REFLECT: u64 = 1 << 24;
    /// Noise adjustment scan
    pub const NOISEADJSCAN: u64 = 1 << 25;

    /// Whether all bits of `flag` are set
    pub const fn contains(self, flag: u64) -> bool {
        self.0 & flag == flag
    }

    /// Noise adjustment scan
    pub const fn is_noise(self) -> bool {
        self.contains(Self::NOISEADJSCAN)
    }

    /// Reference-only scan (PAT reference not reused for imaging)
    pub const fn is_reference_only(self) -> bool {
        self.contains(Self::PATREFSCAN) && !self.contains(Self::PATREFANDIMASCAN)
    }

    /// Records that carry no image data: feedback, phase correction and
    /// stream control records.
    pub const fn is_non_imaging(self) -> bool {
        self.0
            & (Self::ACQEND
                | Self::SYNCDATA
                | Self::RTFEEDBACK
                | Self::HPFEEDBACK
                | Self::PHASCOR)
            != 0
    }
}

/// Vendor loop counters, in hardware acquisition order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoopCounters {
    /// Phase encoding line
    pub line: u16,
    /// Averaging loop
    pub acquisition: u16,
    /// Slice
    pub slice: u16,
    /// Partition (second phase encoding)
    pub partition: u16,
    /// Echo
    pub echo: u16,
    /// Cardiac / physio phase
    pub phase: u16,
    /// Repetition
    pub repetition: u16,
    /// Set
    pub set: u16,
    /// Segment
    pub segment: u16,
    /// Free counters `ida`..`ide`
    pub user: [u16; 5],
}

impl LoopCounters {
    /// Number of u16 counters stored in the MDH
    pub const COUNT: usize = 14;

    fn read(bytes: &[u8]) -> Self {
        let at = |i: usize| LittleEndian::read_u16(&bytes[i * 2..]);
        Self {
            line: at(0),
            acquisition: at(1),
            slice: at(2),
            partition: at(3),
            echo: at(4),
            phase: at(5),
            repetition: at(6),
            set: at(7),
            segment: at(8),
            user: [at(9), at(10), at(11), at(12), at(13)],
        }
    }

    pub(crate) fn to_array(self) -> [u16; Self::COUNT] {
        let [a, b, c, d, e] = self.user;
        [
            self.line,
            self.acquisition,
            self.slice,
            self.partition,
            self.echo,
            self.phase,
            self.repetition,
            self.set,
            self.segment,
            a,
            b,
            c,
            d,
            e,
        ]
    }
}

/// Scalar fields of one record's MDH
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordHeader {
    /// Measurement UID
    pub measurement_uid: u32,
    /// Running scan counter
    pub scan_counter: u32,
    /// Acquisition time stamp (2.5 ms ticks)
    pub timestamp: u32,
    /// Physiological time stamp
    pub pmu_timestamp: u32,
    /// Flags
    pub eval_mask: EvalInfoMask,
    /// Samples per channel
    pub samples: u16,
    /// Channels in the record
    pub channels: u16,
    /// Loop counters
    pub counters: LoopCounters,
    /// Samples to discard at the start of the readout
    pub cutoff_pre: u16,
    /// Samples to discard at the end of the readout
    pub cutoff_post: u16,
    /// k-space centre column
    pub centre_column: u16,
    /// k-space centre line
    pub centre_line: u16,
    /// k-space centre partition
    pub centre_partition: u16,
    /// Slice position (sagittal, coronal, transverse), mm
    pub slice_position: [f32; 3],
}

/// Samples of one receive channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelData {
    /// Hardware channel id
    pub id: u16,
    /// Complex samples
    pub samples: Vec<Complex32>,
}

/// One acquisition event
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    header: RecordHeader,
    channels: Vec<ChannelData>,
}

impl RawRecord {
    /// Build a record, enforcing that every channel holds the same number of
    /// samples. The header's sample and channel counts are taken from `channels`.
    ///
    /// Returns `None` for an empty channel list, mismatched channel lengths or
    /// counts that do not fit the MDH fields.
    pub fn new(mut header: RecordHeader, channels: Vec<ChannelData>) -> Option<Self> {
        let samples = channels.first()?.samples.len();
        if channels.iter().any(|c| c.samples.len() != samples) {
            return None;
        }
        header.samples = u16::try_from(samples).ok()?;
        header.channels = u16::try_from(channels.len()).ok()?;
        Some(Self { header, channels })
    }

    /// MDH fields
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    /// Loop counters
    pub fn counters(&self) -> &LoopCounters {
        &self.header.counters
    }

    /// Flags
    pub fn eval_mask(&self) -> EvalInfoMask {
        self.header.eval_mask
    }

    /// Channel payloads
    pub fn channels(&self) -> &[ChannelData] {
        &self.channels
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn sample_count(&self) -> usize {
        usize::from(self.header.samples)
    }

    /// Split into header and channel payloads
    pub fn into_parts(self) -> (RecordHeader, Vec<ChannelData>) {
        (self.header, self.channels)
    }
}

/// Lazy, single-pass decoder over the record area of a measurement.
///
/// Yields records until the `ACQEND` marker or the end of the measurement.
/// After the first error the iterator is exhausted.
pub struct RecordDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    version: FormatVersion,
    finished: bool,
    skipped_sync: usize,
}

impl<'a> RecordDecoder<'a> {
    /// Decode records in `bytes[start..end]` with the given layout
    pub fn new(bytes: &'a [u8], start: usize, end: usize, version: FormatVersion) -> Self {
        let end = end.min(bytes.len());
        Self {
            bytes,
            pos: start.min(end),
            end,
            version,
            finished: false,
            skipped_sync: 0,
        }
    }

    /// Layout this decoder reads
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Byte offset of the next record
    pub fn position(&self) -> usize {
        self.pos
    }

    fn next_record(&mut self) -> Result<Option<RawRecord>, TwixError> {
        let layout = self.version.layout();
        let bytes = self.bytes;
        loop {
            let remaining = self.end - self.pos;
            let offset = self.pos as u64;
            if remaining == 0 {
                warn!("Record stream ended at byte {offset} without ACQEND marker");
                return Ok(None);
            }
            if remaining < layout.scan_header_len {
                return Err(TwixError::TruncatedRecord {
                    offset,
                    needed: layout.scan_header_len as u64,
                    available: remaining as u64,
                });
            }

            let head = &bytes[self.pos..self.pos + layout.scan_header_len];
            let mask = EvalInfoMask(LittleEndian::read_u64(&head[layout.eval_mask..]));

            if mask.contains(EvalInfoMask::ACQEND) {
                debug!(
                    "ACQEND at byte {offset}, {} sync records skipped",
                    self.skipped_sync
                );
                return Ok(None);
            }

            if mask.contains(EvalInfoMask::SYNCDATA) {
                let dma = (LittleEndian::read_u32(&head[FLAGS_AND_DMA..]) & DMA_LENGTH_MASK) as usize;
                if dma < layout.scan_header_len {
                    return Err(TwixError::InvalidRecord {
                        offset,
                        reason: format!("sync record declares DMA length {dma}"),
                    });
                }
                if dma > remaining {
                    return Err(TwixError::TruncatedRecord {
                        offset,
                        needed: dma as u64,
                        available: remaining as u64,
                    });
                }
                self.pos += dma;
                self.skipped_sync += 1;
                continue;
            }

            let samples = LittleEndian::read_u16(&head[layout.samples..]);
            let channels = LittleEndian::read_u16(&head[layout.channels..]);
            if channels == 0 || channels > MAX_CHANNELS {
                return Err(TwixError::InvalidRecord {
                    offset,
                    reason: format!("channel count {channels} outside 1..={MAX_CHANNELS}"),
                });
            }
            if samples == 0 {
                return Err(TwixError::InvalidRecord {
                    offset,
                    reason: "record declares zero samples".to_string(),
                });
            }

            let len = self
                .version
                .record_len(usize::from(channels), usize::from(samples));
            if len > MAX_RECORD_BYTES {
                return Err(TwixError::InvalidRecord {
                    offset,
                    reason: format!("record payload of {len} bytes exceeds limit"),
                });
            }
            if len > remaining {
                return Err(TwixError::TruncatedRecord {
                    offset,
                    needed: len as u64,
                    available: remaining as u64,
                });
            }

            let record = self.decode(offset, &bytes[self.pos..self.pos + len], head, channels, samples)?;
            self.pos += len;
            return Ok(Some(record));
        }
    }

    fn decode(
        &self,
        offset: u64,
        bytes: &[u8],
        head: &[u8],
        channels: u16,
        samples: u16,
    ) -> Result<RawRecord, TwixError> {
        let layout = self.version.layout();
        let header = RecordHeader {
            measurement_uid: LittleEndian::read_u32(&head[MEASUREMENT_UID..]),
            scan_counter: LittleEndian::read_u32(&head[SCAN_COUNTER..]),
            timestamp: LittleEndian::read_u32(&head[TIMESTAMP..]),
            pmu_timestamp: LittleEndian::read_u32(&head[PMU_TIMESTAMP..]),
            eval_mask: EvalInfoMask(LittleEndian::read_u64(&head[layout.eval_mask..])),
            samples,
            channels,
            counters: LoopCounters::read(&head[layout.loop_counters..]),
            cutoff_pre: LittleEndian::read_u16(&head[layout.cutoff..]),
            cutoff_post: LittleEndian::read_u16(&head[layout.cutoff + 2..]),
            centre_column: LittleEndian::read_u16(&head[layout.centre_column..]),
            centre_line: LittleEndian::read_u16(&head[layout.centre_line..]),
            centre_partition: LittleEndian::read_u16(&head[layout.centre_partition..]),
            slice_position: [
                LittleEndian::read_f32(&head[layout.slice_position..]),
                LittleEndian::read_f32(&head[layout.slice_position + 4..]),
                LittleEndian::read_f32(&head[layout.slice_position + 8..]),
            ],
        };

        let first_channel = if layout.scan_header_is_channel_header {
            0
        } else {
            layout.scan_header_len
        };
        let stride = layout.channel_header_len + usize::from(samples) * 8;

        let mut data = Vec::with_capacity(usize::from(channels));
        for index in 0..usize::from(channels) {
            let start = first_channel + index * stride;
            let channel_header = &bytes[start..start + layout.channel_header_len];

            if layout.scan_header_is_channel_header {
                let channel_samples = LittleEndian::read_u16(&channel_header[layout.samples..]);
                if channel_samples != samples {
                    return Err(TwixError::InvalidRecord {
                        offset,
                        reason: format!(
                            "channel {index} declares {channel_samples} samples, first channel {samples}"
                        ),
                    });
                }
            }

            let id = LittleEndian::read_u16(&channel_header[layout.channel_id..]);
            let payload = &bytes[start + layout.channel_header_len..start + stride];
            data.push(ChannelData {
                id,
                samples: read_complex(payload),
            });
        }

        RawRecord::new(header, data).ok_or_else(|| TwixError::InvalidRecord {
            offset,
            reason: "inconsistent channel payloads".to_string(),
        })
    }
}

impl Iterator for RecordDecoder<'_> {
    type Item = Result<RawRecord, TwixError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for RecordDecoder<'_> {}

/// Interleaved little-endian f32 pairs to complex samples
fn read_complex(bytes: &[u8]) -> Vec<Complex32> {
    bytes
        .chunks_exact(8)
        .map(|pair| {
            Complex32::new(
                LittleEndian::read_f32(&pair[..4]),
                LittleEndian::read_f32(&pair[4..]),
            )
        })
        .collect()
}
