//! # Scan metadata
//!
//! Reads the acquisition parameters the consortium files carry out of the
//! twix protocol buffers, then maps them together with subject settings onto
//! an ISMRMRD header and per-acquisition headers.
//!
//! Protocol values are looked up through fallback chains, because parameter
//! locations moved between scanner software releases and sequence versions:
//!
//! | Parameter | Lookup order |
//! |---|---|
//! | scan date | `tReferenceImage0` (last dotted segment, `YYYYMMDD…`) |
//! | dwell time | `sRXSPEC.alDwellTime[0]`, `Meas alDwellTime` (ns) |
//! | TR | `Config TR`, `alTR[0]` (µs) |
//! | TE | `alTE[0]` (µs) |
//! | frequency | `Dicom lFrequency`, `Meas lFrequency` (Hz) |
//! | dissolved offset | `sWipMemBlock.alFree[4]`, `sWiPMemBlock.adFree[8]` (Hz) |
//! | FOV | `Config ReadFoV` (mm) |
//!
//! Values that are absent stay `None`; the mapper decides which of them are
//! required.

mod error;
mod mapper;


use chrono::NaiveDate;
use log::debug;
use serde::Serialize;

use crate::twix::ProtocolHeader;

pub use error::MetadataError;
pub use mapper::{acquisition_flags, map_acquisitions, map_header, BONUS_SPECTRA_LABEL};

/// Gas flip angle when the protocol carries none, degrees
pub const DEFAULT_GAS_FLIP_ANGLE: f64 = 0.5;
/// Proton flip angle when the protocol carries none, degrees
pub const DEFAULT_PROTON_FLIP_ANGLE: f64 = 5.0;
/// Lower bound for the gradient ramp time, µs
pub const MIN_RAMP_TIME_US: f64 = 100.0;

/// Acquisition parameters read from the protocol buffers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanParameters {
    /// Date of the scan
    pub scan_date: Option<NaiveDate>,
    /// Scanner software version
    pub software_version: Option<String>,
    /// Protocol name
    pub protocol_name: Option<String>,
    /// Scanner manufacturer
    pub vendor: Option<String>,
    /// Scanner model
    pub model: Option<String>,
    /// Site
    pub institution: Option<String>,
    /// Main field, T
    pub field_strength_t: Option<f64>,
    /// ADC dwell time, µs
    pub dwell_time_us: Option<f64>,
    /// Repetition time between consecutive readouts, ms
    pub tr_ms: Option<f64>,
    /// Echo time, ms
    pub te_ms: Option<f64>,
    /// Transmit centre frequency, Hz
    pub center_frequency_hz: Option<i64>,
    /// Dissolved-phase excitation offset, Hz
    pub dissolved_offset_hz: Option<i64>,
    /// Gas flip angle, degrees
    pub flip_angle_gas_deg: f64,
    /// Dissolved flip angle, degrees
    pub flip_angle_dissolved_deg: Option<f64>,
    /// Proton flip angle, degrees
    pub flip_angle_proton_deg: f64,
    /// Readout gradient ramp time, µs
    pub ramp_time_us: f64,
    /// Readout field of view, mm
    pub fov_mm: Option<f64>,
    /// Slice orientation, lowercase
    pub orientation: Option<String>,
}

impl ScanParameters {
    /// Extract every known parameter from a parsed protocol.
    pub fn from_protocol(protocol: &ProtocolHeader) -> Self {
        let scan_date = scan_date(protocol);
        let params = Self {
            scan_date,
            software_version: protocol.software_version().map(str::to_string),
            protocol_name: protocol.protocol_name().map(str::to_string),
            vendor: text(protocol, "Dicom", "Manufacturer"),
            model: text(protocol, "Dicom", "ManufacturersModelName"),
            institution: text(protocol, "Dicom", "InstitutionName"),
            field_strength_t: protocol
                .xprot_f64("Dicom", "flMagneticFieldStrength")
                .filter(|v| *v > 0.0),
            dwell_time_us: protocol
                .yaps_f64("sRXSPEC.alDwellTime[0]")
                .or_else(|| protocol.xprot_f64("Meas", "alDwellTime"))
                .map(|ns| ns / 1000.0),
            tr_ms: protocol
                .xprot_f64("Config", "TR")
                .or_else(|| protocol.yaps_f64("alTR[0]"))
                .map(|us| us / 1000.0),
            te_ms: protocol.yaps_f64("alTE[0]").map(|us| us / 1000.0),
            center_frequency_hz: protocol
                .xprot_f64("Dicom", "lFrequency")
                .or_else(|| protocol.xprot_f64("Meas", "lFrequency"))
                .map(|hz| hz.round() as i64),
            dissolved_offset_hz: protocol
                .yaps_f64("sWipMemBlock.alFree[4]")
                .or_else(|| protocol.yaps_f64("sWiPMemBlock.adFree[8]"))
                .map(|hz| hz.round() as i64),
            flip_angle_gas_deg: excitation_flip_angle(protocol).unwrap_or(DEFAULT_GAS_FLIP_ANGLE),
            flip_angle_dissolved_deg: dissolved_flip_angle(protocol, scan_date),
            flip_angle_proton_deg: excitation_flip_angle(protocol)
                .unwrap_or(DEFAULT_PROTON_FLIP_ANGLE),
            ramp_time_us: ramp_time(protocol, scan_date),
            fov_mm: protocol.xprot_f64("Config", "ReadFoV").filter(|v| *v > 0.0),
            orientation: text(protocol, "Dicom", "tOrientation").map(|o| o.to_lowercase()),
        };
        debug!("Scan parameters: {params:?}");
        params
    }
}

fn text(protocol: &ProtocolHeader, buffer: &str, name: &str) -> Option<String> {
    protocol
        .xprot(buffer, name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `nth` whitespace-separated number of an XProtocol array
fn xprot_nth(protocol: &ProtocolHeader, buffer: &str, name: &str, nth: usize) -> Option<f64> {
    protocol
        .xprot(buffer, name)?
        .split_whitespace()
        .nth(nth)?
        .parse()
        .ok()
}

fn first_of(protocol: &ProtocolHeader, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| protocol.yaps_f64(key))
}

/// `tReferenceImage0` ends in a dotted segment starting with `YYYYMMDD`.
fn scan_date(protocol: &ProtocolHeader) -> Option<NaiveDate> {
    let reference = protocol.yaps("tReferenceImage0")?;
    let segment = reference.trim_matches('"').rsplit('.').next()?;
    let digits = segment.get(..8)?;
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Shared chain for the gas and proton excitation.
fn excitation_flip_angle(protocol: &ProtocolHeader) -> Option<f64> {
    xprot_nth(protocol, "Meas", "adFlipAngleDegree", 0)
        .or_else(|| {
            protocol
                .yaps_f64("adFlipAngleDegree[0]")
                .filter(|v| *v < 10.0)
        })
        .or_else(|| {
            first_of(
                protocol,
                &["sWipMemBlock.adFree[5]", "sWiPMemBlock.adFree[5]"],
            )
        })
}

fn dissolved_flip_angle(protocol: &ProtocolHeader, scan_date: Option<NaiveDate>) -> Option<f64> {
    // Sequences before this date stored the dissolved angle in the WIP block.
    let legacy = NaiveDate::from_ymd_opt(2021, 5, 30);
    if scan_date.is_some() && scan_date < legacy {
        let wip = first_of(
            protocol,
            &["sWipMemBlock.adFree[6]", "sWiPMemBlock.adFree[6]"],
        );
        if wip.is_some() {
            return wip;
        }
    }
    xprot_nth(protocol, "Meas", "adFlipAngleDegree", 1)
        .or_else(|| first_of(protocol, &["adFlipAngleDegree[1]", "adFlipAngleDegree[0]"]))
}

fn ramp_time(protocol: &ProtocolHeader, scan_date: Option<NaiveDate>) -> f64 {
    let cutover = NaiveDate::from_ymd_opt(2018, 9, 21);
    let mut ramp = 0.0;
    if let Some(v) = protocol.xprot_f64("Meas", "RORampTime") {
        ramp = v;
        if scan_date.is_some() && scan_date > cutover {
            return ramp.max(MIN_RAMP_TIME_US);
        }
    }
    if let Some(v) = protocol.xprot_f64("Meas", "alRegridRampupTime") {
        ramp = v;
    }
    ramp.max(MIN_RAMP_TIME_US)
}
