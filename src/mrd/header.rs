//! ISMRMRD header model.
//!
//! Only the parts of the ISMRMRD schema the converter populates are modelled.
//! Element names follow the schema; see [`super::xml`] for serialization.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// k-space trajectory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trajectory {
    /// Cartesian sampling
    Cartesian,
    /// Echo-planar
    Epi,
    /// Radial spokes
    Radial,
    /// Golden-angle radial
    Goldenangle,
    /// Spiral
    Spiral,
    /// Anything else, including non-imaging spectroscopy
    Other,
}

impl Trajectory {
    /// Schema string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cartesian => "cartesian",
            Self::Epi => "epi",
            Self::Radial => "radial",
            Self::Goldenangle => "goldenangle",
            Self::Spiral => "spiral",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trajectory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cartesian" => Ok(Self::Cartesian),
            "epi" => Ok(Self::Epi),
            "radial" => Ok(Self::Radial),
            "goldenangle" => Ok(Self::Goldenangle),
            "spiral" => Ok(Self::Spiral),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown trajectory '{other}'")),
        }
    }
}

/// Value of a free-form user parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserParameterValue {
    /// `userParameterLong`
    Long(i64),
    /// `userParameterDouble`
    Double(f64),
    /// `userParameterString`
    String(String),
}

impl fmt::Display for UserParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Named user parameters, kept in insertion order per type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserParameters {
    /// `userParameterLong` entries
    pub longs: Vec<(String, i64)>,
    /// `userParameterDouble` entries
    pub doubles: Vec<(String, f64)>,
    /// `userParameterString` entries
    pub strings: Vec<(String, String)>,
}

impl UserParameters {
    /// Append a parameter under the list matching its type
    pub fn push(&mut self, name: impl Into<String>, value: UserParameterValue) {
        let name = name.into();
        match value {
            UserParameterValue::Long(v) => self.longs.push((name, v)),
            UserParameterValue::Double(v) => self.doubles.push((name, v)),
            UserParameterValue::String(v) => self.strings.push((name, v)),
        }
    }

    /// Look a parameter up by name
    pub fn get(&self, name: &str) -> Option<UserParameterValue> {
        self.longs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| UserParameterValue::Long(*v))
            .or_else(|| {
                self.doubles
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| UserParameterValue::Double(*v))
            })
            .or_else(|| {
                self.strings
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| UserParameterValue::String(v.clone()))
            })
    }

    /// No parameters of any type
    pub fn is_empty(&self) -> bool {
        self.longs.is_empty() && self.doubles.is_empty() && self.strings.is_empty()
    }
}

/// Range of one encoding dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Limit {
    /// Smallest index
    pub minimum: u16,
    /// Largest index
    pub maximum: u16,
    /// Centre index
    pub center: u16,
}

impl Limit {
    /// Limit with centre at `minimum`
    pub fn new(minimum: u16, maximum: u16) -> Self {
        Self {
            minimum,
            maximum,
            center: minimum,
        }
    }

    /// Number of indices covered
    pub fn span(&self) -> u32 {
        u32::from(self.maximum) - u32::from(self.minimum) + 1
    }
}

/// `encodingLimits`; dimensions the scan does not use are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncodingLimits {
    /// Phase encoding (line / radial projection)
    pub kspace_encoding_step_1: Option<Limit>,
    /// Partition encoding
    pub kspace_encoding_step_2: Option<Limit>,
    /// Averages
    pub average: Option<Limit>,
    /// Slices
    pub slice: Option<Limit>,
    /// Contrasts / echoes
    pub contrast: Option<Limit>,
    /// Physio phases
    pub phase: Option<Limit>,
    /// Repetitions
    pub repetition: Option<Limit>,
    /// Sets
    pub set: Option<Limit>,
    /// Segments
    pub segment: Option<Limit>,
}

impl EncodingLimits {
    /// Schema element names paired with their limits, in schema order
    pub fn entries(&self) -> [(&'static str, Option<Limit>); 9] {
        [
            ("kspace_encoding_step_1", self.kspace_encoding_step_1),
            ("kspace_encoding_step_2", self.kspace_encoding_step_2),
            ("average", self.average),
            ("slice", self.slice),
            ("contrast", self.contrast),
            ("phase", self.phase),
            ("repetition", self.repetition),
            ("set", self.set),
            ("segment", self.segment),
        ]
    }

    /// Mutable access by schema element name
    pub fn entry_mut(&mut self, name: &str) -> Option<&mut Option<Limit>> {
        Some(match name {
            "kspace_encoding_step_1" => &mut self.kspace_encoding_step_1,
            "kspace_encoding_step_2" => &mut self.kspace_encoding_step_2,
            "average" => &mut self.average,
            "slice" => &mut self.slice,
            "contrast" => &mut self.contrast,
            "phase" => &mut self.phase,
            "repetition" => &mut self.repetition,
            "set" => &mut self.set,
            "segment" => &mut self.segment,
            _ => return None,
        })
    }

    /// Whether no dimension is populated
    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|(_, limit)| limit.is_none())
    }
}

/// `encodedSpace` / `reconSpace`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EncodingSpace {
    /// Matrix size x, y, z
    pub matrix: [u32; 3],
    /// Field of view x, y, z in mm
    pub fov_mm: [f64; 3],
}

/// `trajectoryDescription`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrajectoryDescription {
    /// Free-form identifier
    pub identifier: String,
    /// `userParameterLong` entries
    pub longs: Vec<(String, i64)>,
}

/// One `encoding` element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encoding {
    /// Acquired matrix
    pub encoded_space: EncodingSpace,
    /// Matrix for reconstruction
    pub recon_space: EncodingSpace,
    /// Index ranges
    pub limits: EncodingLimits,
    /// Trajectory type
    pub trajectory: Trajectory,
    /// Optional trajectory parameters
    pub trajectory_description: Option<TrajectoryDescription>,
}

/// `acquisitionSystemInformation`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionSystem {
    /// Vendor
    pub vendor: Option<String>,
    /// Model
    pub model: Option<String>,
    /// Main field strength
    pub field_strength_t: Option<f64>,
    /// Receive channels
    pub receiver_channels: Option<u16>,
    /// Institution
    pub institution: Option<String>,
}

/// `sequenceParameters`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequenceParameters {
    /// Repetition times in ms
    pub tr_ms: Vec<f64>,
    /// Echo times in ms
    pub te_ms: Vec<f64>,
    /// Flip angles in degrees
    pub flip_angle_deg: Vec<f64>,
}

impl SequenceParameters {
    /// No parameter lists populated
    pub fn is_empty(&self) -> bool {
        self.tr_ms.is_empty() && self.te_ms.is_empty() && self.flip_angle_deg.is_empty()
    }
}

/// The `ismrmrdHeader` document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MrdHeader {
    /// Schema version
    pub version: u32,
    /// `subjectInformation.patientID`
    pub subject_id: String,
    /// `studyInformation.studyDate`
    pub study_date: NaiveDate,
    /// `studyInformation.studyID`
    pub study_id: Option<String>,
    /// `measurementInformation.protocolName`
    pub protocol_name: Option<String>,
    /// `acquisitionSystemInformation`
    pub system: AcquisitionSystem,
    /// `experimentalConditions.H1resonanceFrequency_Hz`
    pub h1_resonance_frequency_hz: i64,
    /// `encoding`
    pub encoding: Encoding,
    /// `sequenceParameters`
    pub sequence: SequenceParameters,
    /// `userParameters`
    pub user_parameters: UserParameters,
}

/// Schema version written into every header
pub const HEADER_VERSION: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_strings() {
        for trajectory in [
            Trajectory::Cartesian,
            Trajectory::Epi,
            Trajectory::Radial,
            Trajectory::Goldenangle,
            Trajectory::Spiral,
            Trajectory::Other,
        ] {
            assert_eq!(trajectory.as_str().parse::<Trajectory>(), Ok(trajectory));
        }
        assert!("zigzag".parse::<Trajectory>().is_err());
    }

    #[test]
    fn test_user_parameters_by_type() {
        let mut params = UserParameters::default();
        params.push("a", UserParameterValue::Long(3));
        params.push("b", UserParameterValue::Double(0.5));
        params.push("c", UserParameterValue::String("x".into()));

        assert_eq!(params.longs, vec![("a".to_string(), 3)]);
        assert_eq!(params.get("b"), Some(UserParameterValue::Double(0.5)));
        assert_eq!(params.get("c"), Some(UserParameterValue::String("x".into())));
        assert_eq!(params.get("d"), None);
    }

    #[test]
    fn test_limit_span() {
        assert_eq!(Limit::new(1, 2).span(), 2);
        assert_eq!(Limit::new(0, 0).span(), 1);
    }
}
