use super::builder::{flagged_record, synthetic_record, TwixBuilder};
use super::*;

fn counters(line: u16, slice: u16, repetition: u16) -> LoopCounters {
    LoopCounters {
        line,
        slice,
        repetition,
        ..LoopCounters::default()
    }
}

fn sample_records() -> Vec<RawRecord> {
    (0..6u16)
        .map(|i| synthetic_record(u32::from(i) + 1, counters(i % 3, 0, i / 3), 4, 32))
        .collect()
}

fn builder(version: FormatVersion) -> TwixBuilder {
    TwixBuilder::new(version)
        .xprot("Config", "ProtocolName", "xe_radial_dixon")
        .xprot("Dicom", "Manufacturer", "SIEMENS")
        .yaps("lRepetitions", "1")
        .yaps("tSequenceFileName", "%CustomerSeq%\\xe_radial_Dixon")
}

#[test]
fn test_vb_and_vd_decode_identical_records() {
    let records = sample_records();

    for version in [FormatVersion::Vb, FormatVersion::Vd] {
        let bytes = builder(version).records(records.clone()).build();
        let twix = TwixFile::from_bytes(bytes).unwrap();
        assert_eq!(twix.version(), version);
        assert_eq!(twix.measurement().kind, version.container_kind());

        let decoded = twix.into_container().unwrap();
        assert_eq!(decoded.records, records, "{version:?}");
        assert_eq!(decoded.receiver_channels(), Some(4));
    }
}

#[test]
fn test_protocol_buffers_are_available() {
    let twix = TwixFile::from_bytes(builder(FormatVersion::Vd).build()).unwrap();
    let protocol = twix.protocol();

    assert_eq!(protocol.protocol_name(), Some("xe_radial_dixon"));
    assert_eq!(protocol.xprot("Dicom", "Manufacturer"), Some("SIEMENS"));
    assert_eq!(protocol.yaps_f64("lRepetitions"), Some(1.0));
    assert_eq!(
        protocol.sequence_name(),
        Some("%CustomerSeq%\\xe_radial_Dixon")
    );
    assert!(protocol.warnings().is_empty());
}

#[test]
fn test_last_raid_measurement_is_selected() {
    let bytes = builder(FormatVersion::Vd)
        .adjustment_scans(2)
        .records(sample_records())
        .build();
    let twix = TwixFile::from_bytes(bytes).unwrap();

    assert_eq!(twix.measurement().measurement_count, 3);
    let entry = twix.measurement().entry.as_ref().unwrap();
    assert_eq!(entry.meas_id, 3);
    assert_eq!(entry.protocol_name, "imaging");
    assert_eq!(twix.records().count(), 6);
}

#[test]
fn test_sync_records_are_skipped() {
    for version in [FormatVersion::Vb, FormatVersion::Vd] {
        let records = sample_records();
        let bytes = builder(version)
            .sync_data(64)
            .record(records[0].clone())
            .sync_data(3)
            .record(records[1].clone())
            .build();
        let decoded = TwixFile::from_bytes(bytes).unwrap().into_container().unwrap();
        assert_eq!(decoded.records, records[..2].to_vec());
    }
}

#[test]
fn test_missing_acq_end_is_tolerated() {
    let bytes = builder(FormatVersion::Vd)
        .records(sample_records())
        .without_acq_end()
        .build();
    let decoded = TwixFile::from_bytes(bytes).unwrap().into_container().unwrap();
    assert_eq!(decoded.records.len(), 6);
}

#[test]
fn test_truncated_record_fails() {
    for version in [FormatVersion::Vb, FormatVersion::Vd] {
        let mut bytes = builder(version)
            .records(sample_records())
            .without_acq_end()
            .build();
        bytes.truncate(bytes.len() - 10);
        // multi-RAID entries declare the original length
        if version == FormatVersion::Vd {
            let twix = TwixFile::from_bytes(bytes);
            assert!(matches!(twix, Err(TwixError::MalformedHeader(_))));
            continue;
        }

        let twix = TwixFile::from_bytes(bytes).unwrap();
        let results: Vec<_> = twix.records().collect();
        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(Result::is_ok));
        match &results[5] {
            Err(TwixError::TruncatedRecord { needed, available, .. }) => {
                assert_eq!(*needed as usize, version.record_len(4, 32));
                assert_eq!(*available + 10, *needed);
            }
            other => panic!("expected TruncatedRecord, got {other:?}"),
        }
    }
}

#[test]
fn test_truncated_vd_record_inside_measurement() {
    // Channel count patched upward so the record claims more bytes than the
    // measurement holds.
    let record = synthetic_record(1, LoopCounters::default(), 2, 8);
    let bytes = builder(FormatVersion::Vd)
        .record(record)
        .without_acq_end()
        .build();
    let twix = TwixFile::from_bytes(bytes.clone()).unwrap();
    let start = twix.measurement().data_offset as usize;
    let mut bytes = bytes;
    let layout = FormatVersion::Vd.layout();
    bytes[start + layout.channels..start + layout.channels + 2].copy_from_slice(&3u16.to_le_bytes());

    let twix = TwixFile::from_bytes(bytes).unwrap();
    let err = twix.into_container().unwrap_err();
    assert!(matches!(err, TwixError::TruncatedRecord { .. }));
}

#[test]
fn test_invalid_channel_count_fails() {
    let bytes = builder(FormatVersion::Vd)
        .record(synthetic_record(1, LoopCounters::default(), 2, 8))
        .build();
    let twix = TwixFile::from_bytes(bytes.clone()).unwrap();
    let start = twix.measurement().data_offset as usize;
    let layout = FormatVersion::Vd.layout();

    let mut bytes = bytes;
    bytes[start + layout.channels..start + layout.channels + 2].copy_from_slice(&0u16.to_le_bytes());
    let err = TwixFile::from_bytes(bytes).unwrap().into_container().unwrap_err();
    assert!(matches!(err, TwixError::InvalidRecord { .. }));
}

#[test]
fn test_decoder_stops_after_error() {
    let mut bytes = builder(FormatVersion::Vb)
        .records(sample_records())
        .without_acq_end()
        .build();
    bytes.truncate(bytes.len() - 1);
    let twix = TwixFile::from_bytes(bytes).unwrap();
    let mut decoder = twix.records();
    let errors = decoder.by_ref().filter(Result::is_err).count();
    assert_eq!(errors, 1);
    assert!(decoder.next().is_none());
}

#[test]
fn test_header_length_beyond_file_is_malformed() {
    let mut bytes = builder(FormatVersion::Vb).build();
    let huge = (bytes.len() as u32 + 100).to_le_bytes();
    bytes[..4].copy_from_slice(&huge);
    assert!(matches!(
        TwixFile::from_bytes(bytes),
        Err(TwixError::MalformedHeader(_))
    ));

    assert!(matches!(
        TwixFile::from_bytes(vec![1, 2, 3]),
        Err(TwixError::MalformedHeader(_))
    ));
}

#[test]
fn test_flags_survive_decoding() {
    let flags = EvalInfoMask::NOISEADJSCAN | EvalInfoMask::REFLECT;
    let record = flagged_record(7, counters(1, 2, 3), 1, 4, flags);
    let bytes = builder(FormatVersion::Vb).record(record).build();
    let decoded = TwixFile::from_bytes(bytes).unwrap().into_container().unwrap();

    let mask = decoded.records[0].eval_mask();
    assert!(mask.is_noise());
    assert!(mask.contains(EvalInfoMask::REFLECT));
    assert_eq!(decoded.records[0].counters().slice, 2);
}

#[test]
fn test_mixed_line_endings_warn_but_parse() {
    let bytes = TwixBuilder::new(FormatVersion::Vb)
        .raw_buffer(
            "MeasYaps",
            "### ASCCONV BEGIN ###\r\nlContrasts = 2\nalTR[0] = 15000\r\n",
        )
        .build();
    let twix = TwixFile::from_bytes(bytes).unwrap();
    assert_eq!(twix.protocol().yaps_f64("lContrasts"), Some(2.0));
    assert_eq!(twix.protocol().warnings().len(), 2);
}
