use anyhow::{Context, Result};
use std::path::PathBuf;

use twix2mrd::classify::classify;
use twix2mrd::discover::category_hint;
use twix2mrd::metadata::ScanParameters;
use twix2mrd::twix::TwixFile;

/// Show what the converter reads from a twix file
pub fn run(file: PathBuf) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let twix = TwixFile::open(&file).context("Failed to read twix header")?;
    let version = twix.version();
    let kind = twix.measurement().kind;

    println!("Twix File Information");
    println!("=====================");
    println!("File: {}", file.display());
    println!("Layout: {:?} ({:?})", version, kind);
    let protocol = twix.protocol();
    println!(
        "Buffers: {}",
        protocol.buffer_names().collect::<Vec<_>>().join(", ")
    );
    for warning in protocol.warnings() {
        println!("  warning: {:?}", warning);
    }
    println!();

    let params = ScanParameters::from_protocol(protocol);
    println!("Scan Parameters:");
    println!(
        "{}",
        serde_json::to_string_pretty(&params).context("Failed to serialize parameters")?
    );
    println!();

    let container = twix.into_container().context("Failed to decode records")?;
    let noise = container
        .records
        .iter()
        .filter(|r| r.eval_mask().is_noise())
        .count();
    println!("Records: {}", container.records.len());
    println!("  Noise: {}", noise);
    if let Some(channels) = container.receiver_channels() {
        println!("  Channels: {}", channels);
    }
    println!();

    let hint = file
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(category_hint);
    match classify(&container.protocol, &container.records, None) {
        Ok(classification) => {
            println!("Category: {}", classification.category);
            println!("  Evidence: {:?}", classification.source);
            if let Some(dixon) = classification.dixon {
                println!("  Echoes: {} (from {:?})", dixon.echoes, dixon.source);
            }
        }
        Err(e) => println!("Category: none ({})", e),
    }
    if let Some(hint) = hint {
        println!("  File name suggests: {}", hint);
    }

    Ok(())
}
