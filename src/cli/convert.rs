use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use twix2mrd::config::SubjectConfig;
use twix2mrd::convert::Converter;

/// Convert every twix file of a subject; returns the process exit status
pub fn run(config: PathBuf, report: Option<PathBuf>, parallel: bool, fail_fast: bool) -> Result<i32> {
    let subject = SubjectConfig::from_file(&config)
        .with_context(|| format!("Failed to load subject config: {}", config.display()))?;
    let settings = subject.resolve();

    info!("twix2mrd - twix to MRD");
    info!("======================");
    info!("Subject: {}", settings.subject_id.as_deref().unwrap_or("<unset>"));
    info!("Data:    {}", settings.data_dir.display());
    info!("Output:  {}", settings.output_dir.display());

    std::fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            settings.output_dir.display()
        )
    })?;

    let converter = Converter::new(settings).with_fail_fast(fail_fast);
    let summary = converter.convert_all(parallel).with_context(|| {
        format!(
            "Failed to list data directory: {}",
            converter.settings().data_dir.display()
        )
    })?;

    println!("{}", summary.format_colored());

    if let Some(report) = report {
        let json = summary.to_json().context("Failed to serialize report")?;
        std::fs::write(&report, json)
            .with_context(|| format!("Failed to write report: {}", report.display()))?;
        info!("Report written to {}", report.display());
    }

    Ok(summary.exit_code())
}
