//! Integration tests for twix2mrd
//!
//! These tests run whole subject visits from a configuration file through to
//! MRD files on disk and read them back.

use std::fs;
use std::path::Path;

use twix2mrd::classify::ScanCategory;
use twix2mrd::config::SubjectConfig;
use twix2mrd::convert::{Converter, ErrorKind, FileStatus};
use twix2mrd::mrd::{flags, read_dataset, Limit, Trajectory, UserParameterValue};
use twix2mrd::twix::builder::consortium_scan;
use twix2mrd::twix::FormatVersion;
use tempfile::tempdir;

const SUBJECT_TOML: &str = r#"
data_dir = "raw"
output_dir = "mrd"
subject_id = "007-005B"

[defaults]
orientation = "coronal"

[calibration]
num_gas_fids = 20
[calibration.user_parameters]
gas_concentration = 0.85

[dixon]
recon_matrix_size = 96
"#;

fn write_visit(root: &Path) {
    let raw = root.join("raw");
    fs::create_dir_all(&raw).unwrap();
    fs::create_dir_all(root.join("mrd")).unwrap();
    fs::write(root.join("subject.toml"), SUBJECT_TOML).unwrap();

    consortium_scan(ScanCategory::Calibration, FormatVersion::Vd)
        .write_to(raw.join("meas_MID00010_FID00100_Xe_cali.dat"))
        .unwrap();
    consortium_scan(ScanCategory::Dixon, FormatVersion::Vd)
        .write_to(raw.join("meas_MID00011_FID00101_xe_radial_Dixon.dat"))
        .unwrap();
    consortium_scan(ScanCategory::Proton, FormatVersion::Vb)
        .write_to(raw.join("meas_MID00012_FID00102_1H_BHUTE.dat"))
        .unwrap();
    consortium_scan(ScanCategory::Proton, FormatVersion::Vd)
        .xprot("Config", "ProtocolName", "AAHScout")
        .yaps("tSequenceFileName", "%SiemensSeq%\\gre")
        .write_to(raw.join("meas_MID00009_FID00099_scout.dat"))
        .unwrap();
    fs::write(raw.join("notes.txt"), "not a scan").unwrap();
}

/// A full visit converts to one file per category
#[test]
fn test_subject_visit() {
    let dir = tempdir().unwrap();
    write_visit(dir.path());

    let settings = SubjectConfig::from_file(dir.path().join("subject.toml"))
        .unwrap()
        .resolve();
    let summary = Converter::new(settings).convert_all(true).unwrap();

    assert_eq!(summary.files.len(), 4);
    assert_eq!(summary.converted_count(), 3);
    assert_eq!(summary.skipped_count(), 1);
    assert_eq!(summary.failed_count(), 0);
    assert_eq!(summary.exit_code(), 0);

    let out = dir.path().join("mrd");
    let mut written: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(
        written,
        vec![
            "007-005B_calibration.mrd",
            "007-005B_dixon.mrd",
            "007-005B_proton.mrd"
        ]
    );

    let calibration = read_dataset(out.join("007-005B_calibration.mrd")).unwrap();
    let header = calibration.header();
    assert_eq!(header.subject_id, "007-005B");
    assert_eq!(header.study_date.to_string(), "2021-06-01");
    assert_eq!(header.encoding.limits.contrast, Some(Limit::new(1, 2)));
    assert_eq!(calibration.acquisitions().len(), 30);
    assert_eq!(
        header.user_parameters.get("gas_concentration"),
        Some(UserParameterValue::Double(0.85))
    );
    assert_eq!(header.user_parameters.get("orientation"), None);
    assert_eq!(
        header.user_parameters.get("xe_center_frequency"),
        Some(UserParameterValue::Long(34_081_645))
    );
    // Gas FIDs sort after dissolved ones.
    let contrasts: Vec<u16> = calibration
        .acquisitions()
        .iter()
        .map(|a| a.header.idx.contrast)
        .collect();
    assert!(contrasts.windows(2).all(|w| w[0] <= w[1]));

    let dixon = read_dataset(out.join("007-005B_dixon.mrd")).unwrap();
    assert_eq!(dixon.header().encoding.recon_space.matrix[0], 96);
    assert_eq!(
        dixon.header().user_parameters.get("orientation"),
        Some(UserParameterValue::String("coronal".to_string()))
    );
    assert_eq!(dixon.acquisitions().len(), 17);

    let proton = read_dataset(out.join("007-005B_proton.mrd")).unwrap();
    let header = proton.header();
    assert_eq!(header.system.receiver_channels, Some(4));
    assert_eq!(header.encoding.trajectory, Trajectory::Radial);
    assert_eq!(header.user_parameters.get("xe_center_frequency"), None);
    assert_eq!(header.encoding.recon_space.matrix, [128, 128, 64]);
    for acquisition in proton.acquisitions() {
        assert_eq!(acquisition.header.active_channels, 4);
        assert_eq!(acquisition.header.number_of_samples, 64);
    }
}

/// The same records decode identically from both container layouts
#[test]
fn test_vb_and_vd_convert_identically() {
    let mut outputs = Vec::new();
    let dir = tempdir().unwrap();
    for version in [FormatVersion::Vb, FormatVersion::Vd] {
        let sub = dir.path().join(format!("{version:?}"));
        fs::create_dir_all(&sub).unwrap();
        consortium_scan(ScanCategory::Dixon, version)
            .write_to(sub.join("dixon.dat"))
            .unwrap();
        let settings = twix2mrd::config::Settings::new(&sub, "007-005B");
        let summary = Converter::new(settings).convert_all(false).unwrap();
        assert_eq!(summary.converted_count(), 1);
        outputs.push(read_dataset(sub.join("007-005B_dixon.mrd")).unwrap());
    }
    assert_eq!(outputs[0].acquisitions(), outputs[1].acquisitions());
}

/// A truncated sibling fails alone and leaves no output behind
#[test]
fn test_truncated_sibling() {
    let dir = tempdir().unwrap();
    let mut bytes = consortium_scan(ScanCategory::Proton, FormatVersion::Vb)
        .without_acq_end()
        .build();
    bytes.truncate(bytes.len() - 32);
    fs::write(dir.path().join("proton_1H.dat"), bytes).unwrap();
    consortium_scan(ScanCategory::Dixon, FormatVersion::Vd)
        .write_to(dir.path().join("xe_dixon.dat"))
        .unwrap();

    let settings = twix2mrd::config::Settings::new(dir.path(), "007-005B");
    let summary = Converter::new(settings).convert_all(true).unwrap();

    assert_eq!(summary.exit_code(), 2);
    let failed = summary
        .files
        .iter()
        .find(|f| f.is_failed())
        .expect("one failure");
    assert!(failed.input.ends_with("proton_1H.dat"));
    assert!(matches!(
        failed.status,
        FileStatus::Failed {
            kind: ErrorKind::TruncatedRecord,
            ..
        }
    ));
    assert!(!dir.path().join("007-005B_proton.mrd").exists());
    assert!(dir.path().join("007-005B_dixon.mrd").exists());
}

/// The JSON report carries one entry per input in discovery order
#[test]
fn test_json_report() {
    let dir = tempdir().unwrap();
    write_visit(dir.path());
    let settings = SubjectConfig::from_file(dir.path().join("subject.toml"))
        .unwrap()
        .resolve();
    let summary = Converter::new(settings).convert_all(false).unwrap();

    let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
    assert_eq!(json["subject_id"], "007-005B");
    let files = json["files"].as_array().unwrap();
    let statuses: Vec<&str> = files
        .iter()
        .map(|f| f["status"].as_str().unwrap())
        .collect();
    // Sorted by file name: MID00009 (scout) comes first.
    assert_eq!(statuses, vec!["skipped", "converted", "converted", "converted"]);
    assert_eq!(files[2]["category"], "dixon");
    assert_eq!(files[2]["acquisitions"], 17);
}

/// The last acquisition alone carries the end-of-measurement flag
#[test]
fn test_last_in_measurement_flag() {
    let dir = tempdir().unwrap();
    consortium_scan(ScanCategory::Calibration, FormatVersion::Vb)
        .write_to(dir.path().join("cali.dat"))
        .unwrap();
    let settings = twix2mrd::config::Settings::new(dir.path(), "007-005B");
    Converter::new(settings).convert_all(false).unwrap();

    let dataset = read_dataset(dir.path().join("007-005B_calibration.mrd")).unwrap();
    let flagged: Vec<usize> = dataset
        .acquisitions()
        .iter()
        .enumerate()
        .filter(|(_, a)| a.header.is_flag_set(flags::LAST_IN_MEASUREMENT))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![dataset.acquisitions().len() - 1]);
}
