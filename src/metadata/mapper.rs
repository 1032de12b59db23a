//! Header and acquisition mapping.

use log::{debug, warn};

use super::{MetadataError, ScanParameters};
use crate::classify::ScanCategory;
use crate::config::CategorySettings;
use crate::mrd::header::HEADER_VERSION;
use crate::mrd::{
    flags, Acquisition, AcquisitionHeader, AcquisitionSystem, Encoding, EncodingSpace, Limit,
    MrdHeader, SequenceParameters, TrajectoryDescription, UserParameterValue, UserParameters,
};
use crate::normalize::NormalizedScan;
use crate::twix::EvalInfoMask;

/// Build the ISMRMRD header of one converted scan.
///
/// Protocol values take precedence; `settings` supply the fallbacks and the
/// category's user parameters, which are appended verbatim after the
/// protocol-derived ones.
///
/// # Errors
///
/// [`MetadataError::IncompleteMetadata`] when the subject identifier, study
/// date, centre frequency, receiver channel count or encoding limits are
/// unavailable.
pub fn map_header(
    params: &ScanParameters,
    scan: &NormalizedScan,
    category: ScanCategory,
    subject_id: Option<&str>,
    receiver_channels: Option<usize>,
    settings: &CategorySettings,
) -> Result<MrdHeader, MetadataError> {
    let subject_id = subject_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| MetadataError::missing("subject_id"))?;
    let study_date = params
        .scan_date
        .ok_or_else(|| MetadataError::missing("study_date"))?;
    let center_frequency_hz = params
        .center_frequency_hz
        .ok_or_else(|| MetadataError::missing("center_frequency"))?;
    let receiver_channels = receiver_channels
        .filter(|n| *n > 0)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| MetadataError::missing("receiver_channels"))?;
    if scan.limits.is_empty() {
        return Err(MetadataError::missing("encoding_limits"));
    }

    let field_strength_t = params.field_strength_t.or(settings.field_strength_t);
    if field_strength_t.is_none() {
        warn!("No magnetic field strength in protocol or settings");
    }

    let system = AcquisitionSystem {
        vendor: params.vendor.clone(),
        model: params.model.clone(),
        field_strength_t,
        receiver_channels: Some(receiver_channels),
        institution: params.institution.clone(),
    };

    Ok(MrdHeader {
        version: HEADER_VERSION,
        subject_id: subject_id.to_string(),
        study_date,
        study_id: None,
        protocol_name: params.protocol_name.clone(),
        system,
        h1_resonance_frequency_hz: center_frequency_hz,
        encoding: encoding(params, scan, category, settings),
        sequence: sequence(params, category),
        user_parameters: user_parameters(params, category, settings),
    })
}

fn encoding(
    params: &ScanParameters,
    scan: &NormalizedScan,
    category: ScanCategory,
    settings: &CategorySettings,
) -> Encoding {
    let limits = scan.limits.clone();
    let samples = scan
        .acquisitions
        .iter()
        .map(|a| a.record.sample_count() as u32)
        .max()
        .unwrap_or(0);
    let span = |limit: Option<Limit>| limit.map_or(1, |l| l.span());
    let fov = params.fov_mm.unwrap_or(settings.fov_mm);

    let encoded_space = EncodingSpace {
        matrix: [
            samples,
            span(limits.kspace_encoding_step_1),
            span(limits.kspace_encoding_step_2),
        ],
        fov_mm: [fov; 3],
    };
    let recon_space = match category {
        ScanCategory::Calibration => encoded_space,
        ScanCategory::Dixon => {
            let n = settings.recon_matrix_size;
            let depth = if encoded_space.matrix[2] > 1 { n } else { 1 };
            EncodingSpace {
                matrix: [n, n, depth],
                fov_mm: [fov; 3],
            }
        }
        // 3D radial: depth follows the readout length
        ScanCategory::Proton => {
            let n = settings.recon_matrix_size;
            EncodingSpace {
                matrix: [n, n, samples],
                fov_mm: [fov; 3],
            }
        }
    };

    Encoding {
        encoded_space,
        recon_space,
        limits,
        trajectory: settings.trajectory,
        trajectory_description: Some(TrajectoryDescription {
            identifier: category.as_str().to_string(),
            longs: vec![("ramp_time".to_string(), params.ramp_time_us.round() as i64)],
        }),
    }
}

fn sequence(params: &ScanParameters, category: ScanCategory) -> SequenceParameters {
    let mut sequence = SequenceParameters::default();
    if let Some(tr) = params.tr_ms {
        // Interleaved gas/dissolved: each phase repeats every other readout.
        sequence.tr_ms = if category.is_xenon() {
            vec![2.0 * tr, 2.0 * tr]
        } else {
            vec![tr]
        };
    }
    sequence.te_ms.extend(params.te_ms);
    if category.is_xenon() {
        sequence.flip_angle_deg.push(params.flip_angle_gas_deg);
        match params.flip_angle_dissolved_deg {
            Some(angle) => sequence.flip_angle_deg.push(angle),
            None => warn!("No dissolved-phase flip angle in protocol"),
        }
    } else {
        sequence.flip_angle_deg.push(params.flip_angle_proton_deg);
    }
    sequence
}

fn user_parameters(
    params: &ScanParameters,
    category: ScanCategory,
    settings: &CategorySettings,
) -> UserParameters {
    let mut out = UserParameters::default();
    if category.is_xenon() {
        if let Some(frequency) = params.center_frequency_hz {
            out.push("xe_center_frequency", UserParameterValue::Long(frequency));
        }
        match params.dissolved_offset_hz {
            Some(offset) => out.push(
                "xe_dissolved_offset_frequency",
                UserParameterValue::Long(offset),
            ),
            None => debug!("No dissolved offset frequency in protocol"),
        }
    }
    // Spectroscopy has no image orientation.
    if category != ScanCategory::Calibration {
        let orientation = params
            .orientation
            .clone()
            .unwrap_or_else(|| settings.orientation.clone());
        out.push("orientation", UserParameterValue::String(orientation));
    }

    for (name, value) in &settings.user_parameters {
        out.push(name.clone(), value.clone());
    }
    out
}

/// MRD flag bits carried over from the vendor eval-info mask.
pub fn acquisition_flags(mask: EvalInfoMask) -> u64 {
    const MAPPING: [(u64, u64); 7] = [
        (EvalInfoMask::NOISEADJSCAN, flags::IS_NOISE_MEASUREMENT),
        (EvalInfoMask::PATREFSCAN, flags::IS_PARALLEL_CALIBRATION),
        (
            EvalInfoMask::PATREFANDIMASCAN,
            flags::IS_PARALLEL_CALIBRATION_AND_IMAGING,
        ),
        (EvalInfoMask::REFLECT, flags::IS_REVERSE),
        (EvalInfoMask::PHASCOR, flags::IS_PHASECORR_DATA),
        (EvalInfoMask::RTFEEDBACK, flags::IS_RTFEEDBACK_DATA),
        (EvalInfoMask::HPFEEDBACK, flags::IS_HPFEEDBACK_DATA),
    ];
    MAPPING
        .iter()
        .filter(|(vendor, _)| mask.contains(*vendor))
        .fold(0, |acc, (_, mrd)| acc | mrd)
}

/// `measurement_uid` of a xenon acquisition inside the bonus spectra
pub const BONUS_SPECTRA_LABEL: u32 = 1;

/// Turn normalized records into MRD acquisitions, consuming the samples.
///
/// Acquisitions come out in normalizer order; the writer applies the final
/// ordering and the last-in-measurement flag. Xenon acquisitions carry the
/// bonus-spectra label (0 or [`BONUS_SPECTRA_LABEL`]) as `measurement_uid`;
/// proton acquisitions keep the vendor's.
pub fn map_acquisitions(
    scan: NormalizedScan,
    params: &ScanParameters,
    category: ScanCategory,
    receiver_channels: u16,
) -> Result<Vec<Acquisition>, MetadataError> {
    let sample_time_us = params.dwell_time_us.unwrap_or_else(|| {
        warn!("No dwell time in protocol; sample_time_us left at 0");
        0.0
    }) as f32;

    scan.acquisitions
        .into_iter()
        .map(|indexed| {
            let (raw, channels) = indexed.record.into_parts();
            let measurement_uid = match (category.is_xenon(), indexed.bonus) {
                (false, _) => raw.measurement_uid,
                (true, true) => BONUS_SPECTRA_LABEL,
                (true, false) => 0,
            };
            let header = AcquisitionHeader {
                flags: acquisition_flags(raw.eval_mask),
                measurement_uid,
                scan_counter: raw.scan_counter,
                acquisition_time_stamp: raw.timestamp,
                physiology_time_stamp: [raw.pmu_timestamp, 0, 0],
                available_channels: receiver_channels,
                discard_pre: raw.cutoff_pre,
                discard_post: raw.cutoff_post,
                center_sample: raw.centre_column.min(raw.samples.saturating_sub(1)),
                sample_time_us,
                position: raw.slice_position,
                idx: indexed.index.to_counters(),
                ..AcquisitionHeader::default()
            };
            let samples = channels.into_iter().map(|c| c.samples).collect();
            Acquisition::from_channels(header, samples).ok_or(MetadataError::UnrepresentableRecord {
                ordinal: indexed.ordinal,
            })
        })
        .collect()
}
