use std::fs;
use std::path::Path;

use super::*;
use crate::mrd::{flags, read_dataset, Limit};
use crate::twix::builder::{consortium_scan, TwixBuilder};
use crate::twix::FormatVersion;

fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::new(dir, "007-005B");
    settings.output_dir = dir.join("out");
    fs::create_dir_all(&settings.output_dir).unwrap();
    settings
}

fn write(dir: &Path, name: &str, builder: TwixBuilder) -> DiscoveredFile {
    let path = dir.join(name);
    builder.write_to(&path).unwrap();
    DiscoveredFile::new(path)
}

fn unrecognized() -> TwixBuilder {
    consortium_scan(ScanCategory::Proton, FormatVersion::Vd)
        .xprot("Config", "ProtocolName", "AAHScout")
        .yaps("tSequenceFileName", "%SiemensSeq%\\gre")
}

#[test]
fn test_convert_dixon_file() {
    let dir = tempfile::tempdir().unwrap();
    let converter = Converter::new(settings(dir.path()));
    let file = write(
        dir.path(),
        "meas_dixon.dat",
        consortium_scan(ScanCategory::Dixon, FormatVersion::Vd),
    );

    let converted = converter.convert_file(&file).unwrap();

    assert_eq!(converted.category, ScanCategory::Dixon);
    assert_eq!(converted.output, dir.path().join("out/007-005B_dixon.mrd"));
    assert_eq!(converted.acquisitions, 17);
    assert_eq!(converted.superseded, 0);

    let dataset = read_dataset(&converted.output).unwrap();
    let header = dataset.header();
    assert_eq!(header.subject_id, "007-005B");
    assert_eq!(header.encoding.limits.contrast, Some(Limit::new(1, 2)));
    assert_eq!(header.system.receiver_channels, Some(1));

    let acquisitions = dataset.acquisitions();
    assert!(acquisitions[0].header.is_flag_set(flags::IS_NOISE_MEASUREMENT));
    let last = acquisitions.last().unwrap();
    assert!(last.header.is_flag_set(flags::LAST_IN_MEASUREMENT));
    assert_eq!(
        acquisitions
            .iter()
            .filter(|a| a.header.is_flag_set(flags::LAST_IN_MEASUREMENT))
            .count(),
        1
    );
}

#[test]
fn test_batch_reports_each_file() {
    for parallel in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let converter = Converter::new(settings(dir.path()));
        let mut truncated = consortium_scan(ScanCategory::Proton, FormatVersion::Vb)
            .without_acq_end()
            .build();
        truncated.truncate(truncated.len() - 10);

        let cali = write(
            dir.path(),
            "a_cali.dat",
            consortium_scan(ScanCategory::Calibration, FormatVersion::Vb),
        );
        let dixon = write(
            dir.path(),
            "b_dixon.dat",
            consortium_scan(ScanCategory::Dixon, FormatVersion::Vd),
        );
        let scout = write(dir.path(), "c_scout.dat", unrecognized());
        let broken_path = dir.path().join("d_1H.dat");
        fs::write(&broken_path, truncated).unwrap();
        let broken = DiscoveredFile::new(broken_path);

        let summary = converter.convert_batch(&[cali, dixon, scout, broken], parallel);

        assert_eq!(summary.converted_count(), 2, "parallel={parallel}");
        assert_eq!(summary.skipped_count(), 1);
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.exit_code(), 2);
        assert!(summary.files[0].is_converted());
        assert!(summary.files[1].is_converted());
        assert!(summary.files[2].is_skipped());
        match &summary.files[3].status {
            FileStatus::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::TruncatedRecord),
            other => panic!("expected failure, got {other:?}"),
        }

        let out = dir.path().join("out");
        assert!(out.join("007-005B_calibration.mrd").exists());
        assert!(out.join("007-005B_dixon.mrd").exists());
        assert!(!out.join("007-005B_proton.mrd").exists());
        // No temporary files left behind.
        assert_eq!(fs::read_dir(&out).unwrap().count(), 2);
    }
}

#[test]
fn test_output_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "proton.dat",
        consortium_scan(ScanCategory::Proton, FormatVersion::Vd),
    );

    let first = Converter::new(settings(dir.path())).convert_file(&file).unwrap();
    let bytes = fs::read(&first.output).unwrap();
    let second = Converter::new(settings(dir.path())).convert_file(&file).unwrap();

    assert_eq!(first.output, second.output);
    assert_eq!(fs::read(&second.output).unwrap(), bytes);
}

#[test]
fn test_abort_marks_files_not_attempted() {
    let dir = tempfile::tempdir().unwrap();
    let converter = Converter::new(settings(dir.path()));
    let file = write(
        dir.path(),
        "proton.dat",
        consortium_scan(ScanCategory::Proton, FormatVersion::Vd),
    );
    converter.abort_flag().store(true, Ordering::SeqCst);

    let summary = converter.convert_batch(&[file], false);

    assert_eq!(summary.files[0].status, FileStatus::NotAttempted);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn test_fail_fast_stops_after_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let converter = Converter::new(settings(dir.path())).with_fail_fast(true);
    let broken_path = dir.path().join("broken.dat");
    fs::write(&broken_path, b"not a twix file").unwrap();
    let proton = write(
        dir.path(),
        "proton.dat",
        consortium_scan(ScanCategory::Proton, FormatVersion::Vd),
    );

    let summary = converter.convert_batch(&[DiscoveredFile::new(broken_path), proton], false);

    assert!(matches!(
        summary.files[0].status,
        FileStatus::Failed {
            kind: ErrorKind::MalformedHeader,
            ..
        }
    ));
    assert_eq!(summary.files[1].status, FileStatus::NotAttempted);
}

#[test]
fn test_second_file_of_a_category_fails() {
    let dir = tempfile::tempdir().unwrap();
    let converter = Converter::new(settings(dir.path()));
    let first = write(
        dir.path(),
        "proton_1.dat",
        consortium_scan(ScanCategory::Proton, FormatVersion::Vd),
    );
    let second = write(
        dir.path(),
        "proton_2.dat",
        consortium_scan(ScanCategory::Proton, FormatVersion::Vb),
    );

    let summary = converter.convert_batch(&[first, second], false);

    assert!(summary.files[0].is_converted());
    assert!(matches!(
        summary.files[1].status,
        FileStatus::Failed {
            kind: ErrorKind::WriteFailure,
            ..
        }
    ));
}

#[test]
fn test_classifier_wins_over_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let converter = Converter::new(settings(dir.path()));
    let file = write(
        dir.path(),
        "xe_cali.dat",
        consortium_scan(ScanCategory::Dixon, FormatVersion::Vd),
    );
    assert_eq!(file.hint, Some(ScanCategory::Calibration));

    let converted = converter.convert_file(&file).unwrap();
    assert_eq!(converted.category, ScanCategory::Dixon);
}

#[test]
fn test_missing_subject_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.subject_id = None;
    let converter = Converter::new(settings);
    let file = write(
        dir.path(),
        "dixon.dat",
        consortium_scan(ScanCategory::Dixon, FormatVersion::Vd),
    );

    let err = converter.convert_file(&file).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IncompleteMetadata);
    assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
}

#[test]
fn test_unwritable_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.output_dir = dir.path().join("missing");
    let converter = Converter::new(settings);
    let file = write(
        dir.path(),
        "dixon.dat",
        consortium_scan(ScanCategory::Dixon, FormatVersion::Vd),
    );

    let err = converter.convert_file(&file).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteFailure);
}

#[test]
fn test_failed_write_releases_output_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.output_dir = dir.path().join("later");
    let converter = Converter::new(settings);
    let first = write(
        dir.path(),
        "dixon_a.dat",
        consortium_scan(ScanCategory::Dixon, FormatVersion::Vd),
    );
    let second = write(
        dir.path(),
        "dixon_b.dat",
        consortium_scan(ScanCategory::Dixon, FormatVersion::Vb),
    );

    let err = converter.convert_file(&first).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteFailure);

    fs::create_dir_all(dir.path().join("later")).unwrap();
    let converted = converter.convert_file(&second).unwrap();
    assert_eq!(converted.output, dir.path().join("later/007-005B_dixon.mrd"));
    assert!(converted.output.exists());
}

#[test]
fn test_convert_all_discovers_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "meas_cali.dat",
        consortium_scan(ScanCategory::Calibration, FormatVersion::Vd),
    );
    write(dir.path(), "meas_scout.dat", unrecognized());

    let summary = Converter::new(settings(dir.path())).convert_all(false).unwrap();

    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.converted_count(), 1);
    assert_eq!(summary.skipped_count(), 1);
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn test_summary_exit_codes_and_report() {
    let outcome = |status| FileOutcome {
        input: "x.dat".into(),
        status,
    };
    let skipped = || {
        outcome(FileStatus::Skipped {
            reason: "unrecognized".into(),
        })
    };
    let failed = || {
        outcome(FileStatus::Failed {
            kind: ErrorKind::SparseEncodingSpace,
            message: "gap".into(),
        })
    };

    let summary = ConversionSummary {
        subject_id: Some("s".into()),
        files: vec![skipped()],
    };
    assert_eq!(summary.exit_code(), 0);

    let summary = ConversionSummary {
        subject_id: Some("s".into()),
        files: vec![skipped(), failed()],
    };
    assert_eq!(summary.exit_code(), 1);

    let text = summary.to_string();
    assert!(text.contains("SKIPPED: unrecognized"));
    assert!(text.contains("FAILED (sparse_encoding_space): gap"));
    assert!(text.contains("0 converted, 1 skipped, 1 failed"));

    let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
    assert_eq!(json["files"][1]["status"], "failed");
    assert_eq!(json["files"][1]["kind"], "sparse_encoding_space");
    assert_eq!(json["files"][0]["input"], "x.dat");
}
