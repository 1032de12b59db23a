//! Scan category detection.
//!
//! A file's category comes from marker words in its protocol name, then its
//! sequence file name. Record flags can override both: a measurement made
//! only of noise or reference scans is a calibration.

use std::fmt;

use log::debug;
use serde::Serialize;

use crate::twix::{ProtocolHeader, RawRecord};

/// Scan category of one twix file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanCategory {
    /// Dynamic spectroscopy used to calibrate frequency and flip angle
    Calibration,
    /// Anatomical proton UTE
    Proton,
    /// Interleaved gas/dissolved 129Xe
    Dixon,
}

impl ScanCategory {
    /// All categories in marker precedence order
    pub const ALL: [ScanCategory; 3] = [Self::Calibration, Self::Dixon, Self::Proton];

    /// Lowercase name used in file names and headers
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calibration => "calibration",
            Self::Proton => "proton",
            Self::Dixon => "dixon",
        }
    }

    /// Case-insensitive word prefixes identifying the category
    pub fn markers(self) -> &'static [&'static str] {
        match self {
            Self::Calibration => &["cali", "dyn"],
            Self::Dixon => &["dixon"],
            Self::Proton => &["1h", "bhute", "ute"],
        }
    }

    /// Whether the scan carries 129Xe gas/dissolved contrasts
    pub fn is_xenon(self) -> bool {
        matches!(self, Self::Calibration | Self::Dixon)
    }

    /// Categories with a marker starting one of the words of `text`.
    ///
    /// Words are runs of ASCII letters and digits, so `_`, `-`, `.`, spaces
    /// and path separators all split them.
    ///
    /// ```
    /// use twix2mrd::classify::ScanCategory;
    ///
    /// assert_eq!(ScanCategory::matching("fid_xe_calibration"), vec![ScanCategory::Calibration]);
    /// assert!(ScanCategory::matching("route_compute").is_empty());
    /// ```
    pub fn matching(text: &str) -> Vec<ScanCategory> {
        let lower = text.to_ascii_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        Self::ALL
            .into_iter()
            .filter(|category| {
                category
                    .markers()
                    .iter()
                    .any(|m| words.iter().any(|word| word.starts_with(m)))
            })
            .collect()
    }
}

impl fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the category decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchSource {
    /// Record flags (all reference scans)
    RecordFlags,
    /// Protocol name markers
    ProtocolName,
    /// Sequence file name markers
    SequenceName,
}

/// Where the Dixon echo count came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EchoSource {
    /// Subject configuration
    Configuration,
    /// `lContrasts` in the protocol
    Contrasts,
    /// Two flip angles in the protocol
    FlipAngles,
}

/// Interleaving of a Dixon scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DixonLayout {
    /// Interleaved echoes (gas first)
    pub echoes: u16,
    /// Where the count came from
    pub source: EchoSource,
}

/// Result of classifying one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Category
    pub category: ScanCategory,
    /// Echo layout, for Dixon scans
    pub dixon: Option<DixonLayout>,
    /// Evidence used
    pub source: MatchSource,
}

/// Errors that can occur while classifying a scan
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// No category markers found; the file is skipped
    #[error("unrecognized scan (protocol {protocol:?}, sequence {sequence:?})")]
    UnrecognizedScan {
        /// Protocol name, if present
        protocol: Option<String>,
        /// Sequence file name, if present
        sequence: Option<String>,
    },

    /// A Dixon scan whose echo interleaving cannot be determined
    #[error("cannot determine Dixon echo layout: {0}")]
    AmbiguousDixonLayout(String),
}

/// Determine the category of a measurement.
///
/// `configured_echoes` is the subject's `dixon.echoes`, consulted first for
/// Dixon scans.
pub fn classify(
    protocol: &ProtocolHeader,
    records: &[RawRecord],
    configured_echoes: Option<u16>,
) -> Result<Classification, ClassifyError> {
    let (category, source) = match detect_category(protocol, records) {
        Some(found) => found,
        None => {
            return Err(ClassifyError::UnrecognizedScan {
                protocol: protocol.protocol_name().map(str::to_string),
                sequence: protocol.sequence_name().map(str::to_string),
            })
        }
    };
    debug!("Classified as {category} from {source:?}");

    let dixon = match category {
        ScanCategory::Dixon => Some(dixon_layout(protocol, configured_echoes)?),
        _ => None,
    };

    Ok(Classification {
        category,
        dixon,
        source,
    })
}

fn detect_category(
    protocol: &ProtocolHeader,
    records: &[RawRecord],
) -> Option<(ScanCategory, MatchSource)> {
    let mut imaging = records
        .iter()
        .map(RawRecord::eval_mask)
        .filter(|mask| !mask.is_non_imaging())
        .peekable();
    if imaging.peek().is_some()
        && imaging.all(|mask| mask.is_noise() || mask.is_reference_only())
    {
        return Some((ScanCategory::Calibration, MatchSource::RecordFlags));
    }

    for (text, source) in [
        (protocol.protocol_name(), MatchSource::ProtocolName),
        (protocol.sequence_name(), MatchSource::SequenceName),
    ] {
        let Some(text) = text else { continue };
        match ScanCategory::matching(text).as_slice() {
            [single] => return Some((*single, source)),
            [] => {}
            several => debug!("{source:?} '{text}' matches {several:?}; trying next source"),
        }
    }
    None
}

fn dixon_layout(
    protocol: &ProtocolHeader,
    configured_echoes: Option<u16>,
) -> Result<DixonLayout, ClassifyError> {
    if let Some(echoes) = configured_echoes {
        if echoes < 2 {
            return Err(ClassifyError::AmbiguousDixonLayout(format!(
                "configured echo count {echoes} cannot separate gas and dissolved phases"
            )));
        }
        return Ok(DixonLayout {
            echoes,
            source: EchoSource::Configuration,
        });
    }

    if let Some(contrasts) = protocol.yaps_f64("lContrasts") {
        if contrasts >= 2.0 && contrasts <= f64::from(u16::MAX) {
            return Ok(DixonLayout {
                echoes: contrasts as u16,
                source: EchoSource::Contrasts,
            });
        }
    }

    let first = protocol.yaps_f64("adFlipAngleDegree[0]");
    let second = protocol.yaps_f64("adFlipAngleDegree[1]");
    if first.is_some() && second.is_some() {
        return Ok(DixonLayout {
            echoes: 2,
            source: EchoSource::FlipAngles,
        });
    }

    Err(ClassifyError::AmbiguousDixonLayout(
        "no configured echo count, lContrasts < 2 and fewer than two flip angles".to_string(),
    ))
}
