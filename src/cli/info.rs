use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use twix2mrd::mrd::{flags, read_dataset};

/// Display information about an MRD file
pub fn run(file: PathBuf) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let dataset = read_dataset(&file).context("Failed to read MRD file")?;
    let header = dataset.header();
    let acquisitions = dataset.acquisitions();

    println!("MRD File Information");
    println!("====================");
    println!("File: {}", file.display());
    println!();

    println!("Header:");
    println!("  Subject: {}", header.subject_id);
    println!("  Study date: {}", header.study_date);
    if let Some(protocol) = &header.protocol_name {
        println!("  Protocol: {}", protocol);
    }
    if let Some(field) = header.system.field_strength_t {
        println!("  Field strength: {:.3} T", field);
    }
    if let Some(channels) = header.system.receiver_channels {
        println!("  Receiver channels: {}", channels);
    }
    println!("  Frequency: {} Hz", header.h1_resonance_frequency_hz);
    println!("  Trajectory: {}", header.encoding.trajectory.as_str());
    let matrix = header.encoding.encoded_space.matrix;
    println!("  Encoded matrix: {} x {} x {}", matrix[0], matrix[1], matrix[2]);
    println!();

    println!("Encoding Limits:");
    for (name, limit) in header.encoding.limits.entries() {
        if let Some(limit) = limit {
            println!("  {}: {}..={}", name, limit.minimum, limit.maximum);
        }
    }
    println!();

    let noise = acquisitions
        .iter()
        .filter(|a| a.header.is_flag_set(flags::IS_NOISE_MEASUREMENT))
        .count();
    let mut per_contrast: BTreeMap<u16, usize> = BTreeMap::new();
    for acquisition in acquisitions {
        if !acquisition.header.is_flag_set(flags::IS_NOISE_MEASUREMENT) {
            *per_contrast.entry(acquisition.header.idx.contrast).or_default() += 1;
        }
    }

    println!("Acquisitions: {}", acquisitions.len());
    println!("  Noise: {}", noise);
    for (contrast, count) in per_contrast {
        println!("  Contrast {}: {}", contrast, count);
    }

    let params = &header.user_parameters;
    if !params.is_empty() {
        println!();
        println!("User Parameters:");
        for (name, value) in &params.longs {
            println!("  {}: {}", name, value);
        }
        for (name, value) in &params.doubles {
            println!("  {}: {}", name, value);
        }
        for (name, value) in &params.strings {
            println!("  {}: {}", name, value);
        }
    }

    Ok(())
}
