//! # Index normalization
//!
//! Maps vendor loop counters, which follow hardware acquisition order, onto
//! the canonical MRD encoding space:
//!
//! 1. drop feedback, phase-correction and sync records; keep noise scans
//!    flagged and outside the encoding space
//! 2. unwrap the repetition counter
//! 3. assign contrasts per scan category and label Dixon bonus spectra
//! 4. resolve duplicates (later record wins)
//! 5. derive encoding limits from the protocol, widened by observed values
//! 6. require every dense dimension to be gap-free within its limits

mod counter;
mod error;


use std::collections::{BTreeSet, HashMap};
use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;

use crate::classify::{Classification, ScanCategory};
use crate::config::CategorySettings;
use crate::mrd::{EncodingCounters, EncodingLimits, Limit};
use crate::twix::{ProtocolHeader, RawRecord};

pub use counter::WrapCounter;
pub use error::NormalizeError;

/// Index dimensions checked for density
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Slice
    Slice,
    /// Repetition
    Repetition,
    /// Contrast
    Contrast,
    /// Physio phase
    Phase,
    /// Segment
    Segment,
    /// Set
    Set,
}

impl Dimension {
    /// Dimensions in density-check order
    pub const DENSE: [Dimension; 6] = [
        Self::Slice,
        Self::Repetition,
        Self::Contrast,
        Self::Phase,
        Self::Segment,
        Self::Set,
    ];

    /// Schema name of the dimension
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slice => "slice",
            Self::Repetition => "repetition",
            Self::Contrast => "contrast",
            Self::Phase => "phase",
            Self::Segment => "segment",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical position of one acquisition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EncodingIndex {
    /// Phase encoding step (vendor line)
    pub kspace_encode_step_1: u16,
    /// Partition encoding step
    pub kspace_encode_step_2: u16,
    /// Average
    pub average: u16,
    /// Slice
    pub slice: u16,
    /// Contrast
    pub contrast: u16,
    /// Physio phase
    pub phase: u16,
    /// Repetition
    pub repetition: u16,
    /// Set
    pub set: u16,
    /// Segment
    pub segment: u16,
}

impl EncodingIndex {
    /// Value along one dense dimension
    pub fn get(&self, dimension: Dimension) -> u16 {
        match dimension {
            Dimension::Slice => self.slice,
            Dimension::Repetition => self.repetition,
            Dimension::Contrast => self.contrast,
            Dimension::Phase => self.phase,
            Dimension::Segment => self.segment,
            Dimension::Set => self.set,
        }
    }

    /// MRD `idx` block
    pub fn to_counters(&self) -> EncodingCounters {
        EncodingCounters {
            kspace_encode_step_1: self.kspace_encode_step_1,
            kspace_encode_step_2: self.kspace_encode_step_2,
            average: self.average,
            slice: self.slice,
            contrast: self.contrast,
            phase: self.phase,
            repetition: self.repetition,
            set: self.set,
            segment: self.segment,
            user: [0; 8],
        }
    }
}

/// A record with its assigned index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    /// Position among decoded records in file order
    pub ordinal: usize,
    /// Assigned index
    pub index: EncodingIndex,
    /// Part of the bonus spectra trailing a Dixon acquisition
    pub bonus: bool,
    /// The record
    pub record: RawRecord,
}

/// An earlier duplicate replaced by a later record with the same index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupersededRecord {
    /// Position among decoded records in file order
    pub ordinal: usize,
    /// Vendor scan counter
    pub scan_counter: u32,
    /// Shared index
    pub index: EncodingIndex,
    /// Ordinal of the record that replaced it
    pub replaced_by: usize,
}

/// Normalizer inputs taken from classification and settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Scan category
    pub category: ScanCategory,
    /// Interleaved Dixon echoes
    pub echoes: Option<u16>,
    /// Trailing gas FIDs in a calibration scan
    pub num_gas_fids: usize,
}

impl NormalizeOptions {
    /// Options for a classified scan
    pub fn new(classification: &Classification, settings: &CategorySettings) -> Self {
        Self {
            category: classification.category,
            echoes: classification.dixon.map(|layout| layout.echoes),
            num_gas_fids: settings.num_gas_fids,
        }
    }
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedScan {
    /// Noise scans first, then imaging records in file order
    pub acquisitions: Vec<IndexedRecord>,
    /// Effective limits; empty when no imaging record survived
    pub limits: EncodingLimits,
    /// Replaced duplicates
    pub superseded: Vec<SupersededRecord>,
    /// Non-imaging records dropped
    pub dropped: usize,
}

impl NormalizedScan {
    /// Number of noise scans at the front of `acquisitions`
    pub fn noise_count(&self) -> usize {
        self.acquisitions
            .iter()
            .take_while(|a| a.record.eval_mask().is_noise())
            .count()
    }
}

/// Assign encoding indices to a measurement's records.
pub fn normalize(
    protocol: &ProtocolHeader,
    records: Vec<RawRecord>,
    options: &NormalizeOptions,
) -> Result<NormalizedScan, NormalizeError> {
    let total = records.len();
    let mut noise = Vec::new();
    let mut imaging = Vec::new();
    for (ordinal, record) in records.into_iter().enumerate() {
        let mask = record.eval_mask();
        if mask.is_non_imaging() {
            continue;
        }
        if mask.is_noise() {
            noise.push(IndexedRecord {
                ordinal,
                index: EncodingIndex::default(),
                bonus: false,
                record,
            });
        } else {
            imaging.push((ordinal, record));
        }
    }
    let dropped = total - noise.len() - imaging.len();
    debug!(
        "{} imaging, {} noise, {} non-imaging records",
        imaging.len(),
        noise.len(),
        dropped
    );

    let repetitions = assign_repetitions(&imaging)?;
    let contrasts = assign_contrasts(&imaging, &repetitions, options);

    let indexed: Vec<IndexedRecord> = imaging
        .into_iter()
        .zip(repetitions.into_iter().zip(contrasts))
        .map(|((ordinal, record), (repetition, contrast))| {
            let c = record.counters();
            let index = EncodingIndex {
                kspace_encode_step_1: c.line,
                kspace_encode_step_2: c.partition,
                average: c.acquisition,
                slice: c.slice,
                contrast,
                phase: c.phase,
                repetition,
                set: c.set,
                segment: c.segment,
            };
            IndexedRecord {
                ordinal,
                index,
                bonus: false,
                record,
            }
        })
        .collect();

    let mut superseded = Vec::new();
    let mut indexed = deduplicate(indexed, &mut superseded);
    match options.category {
        ScanCategory::Calibration => {
            split_calibration(&mut indexed, options.num_gas_fids);
            indexed = deduplicate(indexed, &mut superseded);
        }
        ScanCategory::Dixon => label_bonus_spectra(&mut indexed),
        ScanCategory::Proton => {}
    }

    let limits = effective_limits(protocol, &indexed, options);
    check_density(&indexed, &limits)?;

    let mut acquisitions = noise;
    acquisitions.extend(indexed);
    Ok(NormalizedScan {
        acquisitions,
        limits,
        superseded,
        dropped,
    })
}

/// Repetition index from the unwrapped vendor repetition counter.
///
/// Inner loop counters never open a new repetition: a line that comes round
/// again under the same outer counters is a re-acquisition, left to
/// de-duplication.
fn assign_repetitions(imaging: &[(usize, RawRecord)]) -> Result<Vec<u16>, NormalizeError> {
    let mut vendor = WrapCounter::new();
    let mut out = Vec::with_capacity(imaging.len());

    for (_, record) in imaging {
        let repetition = vendor.advance(record.counters().repetition);
        let assigned = u16::try_from(repetition).map_err(|_| NormalizeError::CounterOverflow {
            dimension: Dimension::Repetition,
            value: repetition,
        })?;
        out.push(assigned);
    }

    if vendor.wraps() > 0 {
        info!("Repetition counter wrapped {} time(s)", vendor.wraps());
    }
    Ok(out)
}

fn assign_contrasts(
    imaging: &[(usize, RawRecord)],
    repetitions: &[u16],
    options: &NormalizeOptions,
) -> Vec<u16> {
    match options.category {
        ScanCategory::Proton => imaging.iter().map(|(_, r)| r.counters().echo).collect(),
        // assigned after de-duplication
        ScanCategory::Calibration => vec![0; imaging.len()],
        ScanCategory::Dixon => {
            let echoes = options.echoes.unwrap_or(2).max(1);
            let mut seen = imaging.iter().map(|(_, r)| r.counters().echo);
            let first = seen.next();
            let varies = seen.any(|echo| Some(echo) != first);
            if varies {
                return imaging
                    .iter()
                    .map(|(_, r)| r.counters().echo.saturating_add(1))
                    .collect();
            }

            let mut ordinals: HashMap<(u16, u16), u32> = HashMap::new();
            imaging
                .iter()
                .zip(repetitions)
                .map(|((_, record), &repetition)| {
                    let n = ordinals
                        .entry((repetition, record.counters().slice))
                        .or_default();
                    let contrast = 1 + (*n % u32::from(echoes)) as u16;
                    *n += 1;
                    contrast
                })
                .collect()
        }
    }
}

/// Later record wins; earlier duplicates move to `superseded`.
fn deduplicate(records: Vec<IndexedRecord>, superseded: &mut Vec<SupersededRecord>) -> Vec<IndexedRecord> {
    let mut slots: Vec<Option<IndexedRecord>> = Vec::with_capacity(records.len());
    let mut positions: HashMap<EncodingIndex, usize> = HashMap::new();

    for record in records {
        if let Some(previous) = positions.insert(record.index, slots.len()) {
            if let Some(old) = slots[previous].take() {
                info!(
                    "Record {} (scan {}) superseded by record {} at {:?}",
                    old.ordinal,
                    old.record.header().scan_counter,
                    record.ordinal,
                    old.index
                );
                superseded.push(SupersededRecord {
                    ordinal: old.ordinal,
                    scan_counter: old.record.header().scan_counter,
                    index: old.index,
                    replaced_by: record.ordinal,
                });
            }
        }
        slots.push(Some(record));
    }
    slots.into_iter().flatten().collect()
}

/// Trailing `num_gas_fids` records are gas (contrast 1), the rest dissolved (2)
fn split_calibration(records: &mut [IndexedRecord], num_gas_fids: usize) {
    let gas = num_gas_fids.min(records.len());
    let first_gas = records.len() - gas;
    for (i, record) in records.iter_mut().enumerate() {
        record.index.contrast = if i >= first_gas { 1 } else { 2 };
    }
    debug!("Calibration: {} dissolved, {} gas FIDs", first_gas, gas);
}

/// Dixon FID totals that end in bonus spectra
pub const DIXON_BONUS_TOTALS: [usize; 3] = [4230, 2430, 2030];
/// Bonus spectra at the end of such a Dixon scan
pub const BONUS_FIDS: usize = 30;
/// Leading dissolved-phase FIDs of the bonus spectra; the rest are gas
pub const BONUS_DISSOLVED_FIDS: usize = 10;

/// Relabel the trailing bonus spectra: dissolved (2) first, then gas (1).
fn label_bonus_spectra(records: &mut [IndexedRecord]) {
    if !DIXON_BONUS_TOTALS.contains(&records.len()) {
        return;
    }
    let first_bonus = records.len() - BONUS_FIDS;
    for (i, record) in records[first_bonus..].iter_mut().enumerate() {
        record.bonus = true;
        record.index.contrast = if i < BONUS_DISSOLVED_FIDS { 2 } else { 1 };
    }
    debug!(
        "Dixon: {} interleaved FIDs, {} bonus spectra",
        first_bonus, BONUS_FIDS
    );
}

fn declared_count(protocol: &ProtocolHeader, key: &str) -> Option<u16> {
    protocol
        .yaps_f64(key)
        .filter(|v| *v >= 1.0 && *v <= f64::from(u16::MAX))
        .map(|v| v as u16)
}

fn declared_limits(protocol: &ProtocolHeader, options: &NormalizeOptions) -> HashMap<&'static str, Limit> {
    let mut declared = HashMap::new();
    if let Some(n) = declared_count(protocol, "sSliceArray.lSize") {
        declared.insert("slice", Limit::new(0, n - 1));
    }
    if let Some(v) = protocol.yaps_f64("lRepetitions") {
        if (0.0..f64::from(u16::MAX)).contains(&v) {
            declared.insert("repetition", Limit::new(0, v as u16));
        }
    }
    match options.category {
        ScanCategory::Proton => {
            if let Some(n) = declared_count(protocol, "lContrasts") {
                declared.insert("contrast", Limit::new(0, n - 1));
            }
        }
        ScanCategory::Dixon => {
            let echoes = options.echoes.unwrap_or(2).max(1);
            declared.insert("contrast", Limit::new(1, echoes));
        }
        ScanCategory::Calibration => {
            declared.insert("contrast", Limit::new(1, 2));
        }
    }
    if let Some(n) = declared_count(protocol, "sPhysioImaging.lPhases") {
        declared.insert("phase", Limit::new(0, n - 1));
    }
    declared
}

fn effective_limits(
    protocol: &ProtocolHeader,
    records: &[IndexedRecord],
    options: &NormalizeOptions,
) -> EncodingLimits {
    let Some(first) = records.first() else {
        return EncodingLimits::default();
    };

    let declared = declared_limits(protocol, options);
    let observed = |get: fn(&EncodingIndex) -> u16| {
        let (mut lo, mut hi) = (u16::MAX, u16::MIN);
        for record in records {
            let v = get(&record.index);
            lo = lo.min(v);
            hi = hi.max(v);
        }
        Limit::new(lo, hi)
    };

    let mut limits = EncodingLimits::default();
    let fields: [(&'static str, fn(&EncodingIndex) -> u16); 9] = [
        ("kspace_encoding_step_1", |i| i.kspace_encode_step_1),
        ("kspace_encoding_step_2", |i| i.kspace_encode_step_2),
        ("average", |i| i.average),
        ("slice", |i| i.slice),
        ("contrast", |i| i.contrast),
        ("phase", |i| i.phase),
        ("repetition", |i| i.repetition),
        ("set", |i| i.set),
        ("segment", |i| i.segment),
    ];

    for (name, get) in fields {
        let seen = observed(get);
        let limit = match declared.get(name) {
            Some(declared) => {
                let widened = Limit::new(
                    declared.minimum.min(seen.minimum),
                    declared.maximum.max(seen.maximum),
                );
                if widened != *declared {
                    warn!(
                        "Observed {} range {}..={} exceeds declared {}..={}; widening",
                        name, seen.minimum, seen.maximum, declared.minimum, declared.maximum
                    );
                }
                widened
            }
            None => seen,
        };
        if let Some(slot) = limits.entry_mut(name) {
            *slot = Some(limit);
        }
    }

    let header = first.record.header();
    if let Some(k1) = limits.kspace_encoding_step_1.as_mut() {
        k1.center = header.centre_line.clamp(k1.minimum, k1.maximum);
    }
    if let Some(k2) = limits.kspace_encoding_step_2.as_mut() {
        k2.center = header.centre_partition.clamp(k2.minimum, k2.maximum);
    }
    limits
}

fn check_density(records: &[IndexedRecord], limits: &EncodingLimits) -> Result<(), NormalizeError> {
    for dimension in Dimension::DENSE {
        let limit = limits
            .entries()
            .into_iter()
            .find(|(name, _)| *name == dimension.as_str())
            .and_then(|(_, limit)| limit);
        let Some(limit) = limit else { continue };

        let present: BTreeSet<u16> = records.iter().map(|r| r.index.get(dimension)).collect();
        let missing: Vec<u16> = (limit.minimum..=limit.maximum)
            .filter(|v| !present.contains(v))
            .collect();
        if !missing.is_empty() {
            return Err(NormalizeError::SparseEncodingSpace { dimension, missing });
        }
    }
    Ok(())
}
