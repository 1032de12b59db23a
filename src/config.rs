//! Subject configuration and layered settings resolution.
//!
//! A subject is described by one TOML file:
//!
//! ```toml
//! data_dir = "/data/007-005B"
//! subject_id = "007-005B"
//!
//! [defaults]
//! orientation = "coronal"
//!
//! [calibration]
//! num_gas_fids = 20
//! [calibration.user_parameters]
//! gas_concentration = 0.85
//!
//! [dixon]
//! echoes = 2
//! ```
//!
//! Values are resolved once, lowest to highest precedence: built-in global
//! defaults, built-in category defaults, the subject's `[defaults]` table,
//! the subject's category table. User parameter tables merge key by key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::classify::ScanCategory;
use crate::mrd::{Trajectory, UserParameterValue};

/// Errors that can occur while loading a subject configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {}: {source}", path.display())]
    IoError {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or has unknown keys
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration value '{key}': {reason}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Subject identifier, written as a string or a number in TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SubjectIdValue {
    Text(String),
    Number(i64),
}

/// Overridable per-category values; every field optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CategoryOverrides {
    /// Trajectory type
    pub trajectory: Option<Trajectory>,
    /// Fallback image orientation when the protocol has none
    pub orientation: Option<String>,
    /// Fallback field strength in tesla
    pub field_strength_t: Option<f64>,
    /// Fallback field of view in mm
    pub fov_mm: Option<f64>,
    /// Reconstruction matrix size
    pub recon_matrix_size: Option<u32>,
    /// Trailing gas-phase FIDs in a calibration scan
    pub num_gas_fids: Option<usize>,
    /// Interleaved echoes in a Dixon scan
    pub echoes: Option<u16>,
    /// Extra `userParameters`, passed through verbatim
    #[serde(default)]
    pub user_parameters: BTreeMap<String, UserParameterValue>,
}

impl CategoryOverrides {
    /// Layer `upper` on top of `self`
    pub fn overlay(mut self, upper: &CategoryOverrides) -> Self {
        self.trajectory = upper.trajectory.or(self.trajectory);
        self.orientation = upper.orientation.clone().or(self.orientation);
        self.field_strength_t = upper.field_strength_t.or(self.field_strength_t);
        self.fov_mm = upper.fov_mm.or(self.fov_mm);
        self.recon_matrix_size = upper.recon_matrix_size.or(self.recon_matrix_size);
        self.num_gas_fids = upper.num_gas_fids.or(self.num_gas_fids);
        self.echoes = upper.echoes.or(self.echoes);
        for (key, value) in &upper.user_parameters {
            self.user_parameters.insert(key.clone(), value.clone());
        }
        self
    }
}

/// Subject configuration file as written by the user
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubjectConfig {
    /// Directory holding the twix files
    pub data_dir: PathBuf,
    #[serde(default)]
    subject_id: Option<SubjectIdValue>,
    /// Output directory; defaults to `data_dir`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Subject-wide overrides
    #[serde(default)]
    pub defaults: CategoryOverrides,
    /// Calibration overrides
    #[serde(default)]
    pub calibration: CategoryOverrides,
    /// Dixon overrides
    #[serde(default)]
    pub dixon: CategoryOverrides,
    /// Proton overrides
    #[serde(default)]
    pub proton: CategoryOverrides,
}

impl SubjectConfig {
    /// Load from a TOML file; relative directories resolve against the file's directory
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_str(&content)?;

        if let Some(base) = path.parent() {
            if config.data_dir.is_relative() {
                config.data_dir = base.join(&config.data_dir);
            }
            if let Some(out) = config.output_dir.as_mut() {
                if out.is_relative() {
                    *out = base.join(&*out);
                }
            }
        }
        Ok(config)
    }

    /// Parse TOML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Subject identifier as text
    pub fn subject_id(&self) -> Option<String> {
        match &self.subject_id {
            Some(SubjectIdValue::Text(text)) => Some(text.trim().to_string()),
            Some(SubjectIdValue::Number(number)) => Some(number.to_string()),
            None => None,
        }
    }

    fn category(&self, category: ScanCategory) -> &CategoryOverrides {
        match category {
            ScanCategory::Calibration => &self.calibration,
            ScanCategory::Dixon => &self.dixon,
            ScanCategory::Proton => &self.proton,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (table, overrides) in [
            ("defaults", &self.defaults),
            ("calibration", &self.calibration),
            ("dixon", &self.dixon),
            ("proton", &self.proton),
        ] {
            if overrides.echoes == Some(0) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{table}.echoes"),
                    reason: "must be at least 1".to_string(),
                });
            }
            if overrides.recon_matrix_size == Some(0) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{table}.recon_matrix_size"),
                    reason: "must be positive".to_string(),
                });
            }
            if matches!(overrides.field_strength_t, Some(v) if v.is_nan() || v <= 0.0) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{table}.field_strength_t"),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merge all layers into immutable settings
    pub fn resolve(&self) -> Settings {
        let resolve = |category| {
            let layered = builtin_global()
                .overlay(&builtin_category(category))
                .overlay(&self.defaults)
                .overlay(self.category(category));
            CategorySettings::from_layers(layered)
        };

        Settings {
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.clone()),
            data_dir: self.data_dir.clone(),
            subject_id: self.subject_id().filter(|id| !id.is_empty()),
            calibration: resolve(ScanCategory::Calibration),
            dixon: resolve(ScanCategory::Dixon),
            proton: resolve(ScanCategory::Proton),
        }
    }
}

/// Default orientation when neither protocol nor configuration has one
pub const DEFAULT_ORIENTATION: &str = "coronal";
/// Default field of view in mm
pub const DEFAULT_FOV_MM: f64 = 400.0;
/// Default reconstruction matrix size
pub const DEFAULT_RECON_MATRIX: u32 = 128;
/// Default number of trailing gas FIDs in a calibration scan
pub const DEFAULT_NUM_GAS_FIDS: usize = 20;

fn builtin_global() -> CategoryOverrides {
    CategoryOverrides {
        trajectory: Some(Trajectory::Radial),
        orientation: Some(DEFAULT_ORIENTATION.to_string()),
        fov_mm: Some(DEFAULT_FOV_MM),
        recon_matrix_size: Some(DEFAULT_RECON_MATRIX),
        num_gas_fids: Some(DEFAULT_NUM_GAS_FIDS),
        ..CategoryOverrides::default()
    }
}

fn builtin_category(category: ScanCategory) -> CategoryOverrides {
    match category {
        ScanCategory::Calibration => CategoryOverrides {
            trajectory: Some(Trajectory::Other),
            ..CategoryOverrides::default()
        },
        ScanCategory::Dixon | ScanCategory::Proton => CategoryOverrides {
            trajectory: Some(Trajectory::Radial),
            ..CategoryOverrides::default()
        },
    }
}

/// Resolved values for one scan category
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySettings {
    /// Trajectory type
    pub trajectory: Trajectory,
    /// Fallback orientation
    pub orientation: String,
    /// Fallback field strength; `None` lets the mapper apply its default
    pub field_strength_t: Option<f64>,
    /// Fallback field of view in mm
    pub fov_mm: f64,
    /// Reconstruction matrix size
    pub recon_matrix_size: u32,
    /// Trailing gas FIDs in a calibration scan
    pub num_gas_fids: usize,
    /// Dixon echo count from configuration
    pub echoes: Option<u16>,
    /// Extra user parameters in key order
    pub user_parameters: BTreeMap<String, UserParameterValue>,
}

impl CategorySettings {
    fn from_layers(layers: CategoryOverrides) -> Self {
        Self {
            trajectory: layers.trajectory.unwrap_or(Trajectory::Other),
            orientation: layers
                .orientation
                .unwrap_or_else(|| DEFAULT_ORIENTATION.to_string()),
            field_strength_t: layers.field_strength_t,
            fov_mm: layers.fov_mm.unwrap_or(DEFAULT_FOV_MM),
            recon_matrix_size: layers.recon_matrix_size.unwrap_or(DEFAULT_RECON_MATRIX),
            num_gas_fids: layers.num_gas_fids.unwrap_or(DEFAULT_NUM_GAS_FIDS),
            echoes: layers.echoes,
            user_parameters: layers.user_parameters,
        }
    }
}

/// Immutable settings for one conversion run
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory holding the twix files
    pub data_dir: PathBuf,
    /// Directory receiving MRD files
    pub output_dir: PathBuf,
    /// Subject identifier, if configured
    pub subject_id: Option<String>,
    /// Calibration settings
    pub calibration: CategorySettings,
    /// Dixon settings
    pub dixon: CategorySettings,
    /// Proton settings
    pub proton: CategorySettings,
}

impl Settings {
    /// Settings with built-in defaults only
    pub fn new(data_dir: impl Into<PathBuf>, subject_id: impl Into<String>) -> Self {
        let data_dir = data_dir.into();
        SubjectConfig {
            data_dir,
            subject_id: Some(SubjectIdValue::Text(subject_id.into())),
            output_dir: None,
            defaults: CategoryOverrides::default(),
            calibration: CategoryOverrides::default(),
            dixon: CategoryOverrides::default(),
            proton: CategoryOverrides::default(),
        }
        .resolve()
    }

    /// Settings for one category
    pub fn category(&self, category: ScanCategory) -> &CategorySettings {
        match category {
            ScanCategory::Calibration => &self.calibration,
            ScanCategory::Dixon => &self.dixon,
            ScanCategory::Proton => &self.proton,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            data_dir = "/data/007-005B"
            subject_id = "007-005B"
            output_dir = "/data/out"

            [defaults]
            orientation = "axial"
            [defaults.user_parameters]
            site = "duke"
            gas_concentration = 0.5

            [calibration]
            num_gas_fids = 10
            [calibration.user_parameters]
            gas_concentration = 0.85

            [dixon]
            echoes = 2
            recon_matrix_size = 96

            [proton]
            trajectory = "goldenangle"
        "#;

        let settings = SubjectConfig::from_str(toml).unwrap().resolve();
        assert_eq!(settings.subject_id.as_deref(), Some("007-005B"));
        assert_eq!(settings.output_dir, PathBuf::from("/data/out"));

        assert_eq!(settings.calibration.num_gas_fids, 10);
        assert_eq!(settings.calibration.trajectory, Trajectory::Other);
        assert_eq!(settings.calibration.orientation, "axial");
        assert_eq!(
            settings.calibration.user_parameters.get("gas_concentration"),
            Some(&UserParameterValue::Double(0.85))
        );
        assert_eq!(
            settings.calibration.user_parameters.get("site"),
            Some(&UserParameterValue::String("duke".into()))
        );

        assert_eq!(settings.dixon.echoes, Some(2));
        assert_eq!(settings.dixon.recon_matrix_size, 96);
        assert_eq!(settings.dixon.trajectory, Trajectory::Radial);
        assert_eq!(
            settings.dixon.user_parameters.get("gas_concentration"),
            Some(&UserParameterValue::Double(0.5))
        );

        assert_eq!(settings.proton.trajectory, Trajectory::Goldenangle);
        assert_eq!(settings.proton.num_gas_fids, DEFAULT_NUM_GAS_FIDS);
    }

    #[test]
    fn test_minimal_config_uses_builtin_defaults() {
        let settings = SubjectConfig::from_str("data_dir = \"/tmp/x\"\nsubject_id = 42\n")
            .unwrap()
            .resolve();

        assert_eq!(settings.subject_id.as_deref(), Some("42"));
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/x"));
        assert_eq!(settings.proton.trajectory, Trajectory::Radial);
        assert_eq!(settings.calibration.trajectory, Trajectory::Other);
        assert_eq!(settings.dixon.recon_matrix_size, DEFAULT_RECON_MATRIX);
        assert_eq!(settings.dixon.orientation, DEFAULT_ORIENTATION);
        assert_eq!(settings.dixon.field_strength_t, None);
        assert!(settings.proton.user_parameters.is_empty());
    }

    #[test]
    fn test_missing_subject_id_resolves_to_none() {
        let settings = SubjectConfig::from_str("data_dir = \"/tmp/x\"").unwrap().resolve();
        assert_eq!(settings.subject_id, None);
    }

    #[test]
    fn test_user_parameter_value_types() {
        let toml = r#"
            data_dir = "/tmp"
            [proton.user_parameters]
            count = 3
            ratio = 1.5
            label = "bhute"
        "#;
        let settings = SubjectConfig::from_str(toml).unwrap().resolve();
        let params = &settings.proton.user_parameters;
        assert_eq!(params["count"], UserParameterValue::Long(3));
        assert_eq!(params["ratio"], UserParameterValue::Double(1.5));
        assert_eq!(params["label"], UserParameterValue::String("bhute".into()));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            SubjectConfig::from_str("data_dir = \"/tmp\"\n[dixon]\nechos = 2\n"),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            SubjectConfig::from_str("data_dir = \"/tmp\"\n[dixon]\nechoes = 0\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(SubjectConfig::from_str("subject_id = \"x\"").is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subject.toml");
        std::fs::write(&path, "data_dir = \"raw\"\noutput_dir = \"out\"\nsubject_id = \"s1\"\n").unwrap();

        let config = SubjectConfig::from_file(&path).unwrap();
        assert_eq!(config.data_dir, dir.path().join("raw"));
        assert_eq!(config.output_dir, Some(dir.path().join("out")));
    }

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("/data", "sub");
        assert_eq!(settings.subject_id.as_deref(), Some("sub"));
        assert_eq!(settings.category(ScanCategory::Calibration).num_gas_fids, 20);
    }
}
