//! # Conversion orchestration
//!
//! Runs the per-file pipeline (decode, classify, normalize, map, write) over
//! a subject's twix files and collects the outcomes. A failing file never
//! stops its siblings; files are independent and may run on a rayon pool.
//!
//! ```no_run
//! use twix2mrd::config::SubjectConfig;
//! use twix2mrd::convert::Converter;
//!
//! let settings = SubjectConfig::from_file("subject.toml")?.resolve();
//! let converter = Converter::new(settings);
//! let summary = converter.convert_all(true)?;
//! println!("{summary}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod summary;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::classify::{classify, ScanCategory};
use crate::config::Settings;
use crate::discover::{discover, DiscoveredFile};
use crate::metadata::{map_acquisitions, map_header, ScanParameters};
use crate::mrd::{write_dataset, MrdDataset};
use crate::normalize::{normalize, NormalizeOptions};
use crate::twix::TwixFile;

pub use error::{ConversionError, ErrorKind};
pub use summary::{ConversionSummary, FileOutcome, FileStatus};

/// A successfully converted file
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    /// Scan category
    pub category: ScanCategory,
    /// Written MRD file
    pub output: PathBuf,
    /// Acquisitions written, noise scans included
    pub acquisitions: usize,
    /// Earlier duplicates dropped in favour of later records
    pub superseded: usize,
    /// Non-imaging records dropped
    pub dropped: usize,
}

/// Converts a subject's twix files with one immutable set of settings
#[derive(Debug)]
pub struct Converter {
    settings: Settings,
    abort: Arc<AtomicBool>,
    fail_fast: bool,
    claimed: Mutex<BTreeMap<ScanCategory, PathBuf>>,
}

impl Converter {
    /// Create a converter
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            abort: Arc::new(AtomicBool::new(false)),
            fail_fast: false,
            claimed: Mutex::new(BTreeMap::new()),
        }
    }

    /// Stop starting new files after the first failure
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Share an externally owned abort flag
    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Flag that, once set, marks all files not yet started as not attempted
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Settings in use
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Output path for a category: `{output_dir}/{subject_id}_{category}.mrd`
    pub fn output_path(&self, category: ScanCategory) -> PathBuf {
        let subject = self.settings.subject_id.as_deref().unwrap_or("unknown");
        self.settings
            .output_dir
            .join(format!("{subject}_{}.mrd", category.as_str()))
    }

    /// Discover the data directory and convert everything found.
    pub fn convert_all(&self, parallel: bool) -> io::Result<ConversionSummary> {
        let files = discover(&self.settings.data_dir)?;
        if files.is_empty() {
            warn!(
                "No twix files found in {}",
                self.settings.data_dir.display()
            );
        }
        Ok(self.convert_batch(&files, parallel))
    }

    /// Convert a list of files, in parallel when requested and compiled in.
    ///
    /// Outcomes are reported in input order regardless of scheduling.
    pub fn convert_batch(&self, files: &[DiscoveredFile], parallel: bool) -> ConversionSummary {
        let outcomes = if parallel {
            self.run_parallel(files)
        } else {
            files.iter().map(|file| self.outcome(file)).collect()
        };
        ConversionSummary {
            subject_id: self.settings.subject_id.clone(),
            files: outcomes,
        }
    }

    #[cfg(feature = "parallel")]
    fn run_parallel(&self, files: &[DiscoveredFile]) -> Vec<FileOutcome> {
        info!("Converting {} file(s) in parallel", files.len());
        files.par_iter().map(|file| self.outcome(file)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_parallel(&self, files: &[DiscoveredFile]) -> Vec<FileOutcome> {
        warn!("Built without the `parallel` feature; converting sequentially");
        files.iter().map(|file| self.outcome(file)).collect()
    }

    fn outcome(&self, file: &DiscoveredFile) -> FileOutcome {
        let input = file.path.clone();
        if self.abort.load(Ordering::SeqCst) {
            return FileOutcome {
                input,
                status: FileStatus::NotAttempted,
            };
        }

        let status = match self.convert_file(file) {
            Ok(converted) => FileStatus::Converted {
                category: converted.category,
                output: converted.output,
                acquisitions: converted.acquisitions,
                superseded: converted.superseded,
            },
            Err(e) if e.is_skip() => {
                info!("Skipping {}: {}", file.path.display(), e);
                FileStatus::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!("Failed to convert {}: {}", file.path.display(), e);
                if self.fail_fast {
                    self.abort.store(true, Ordering::SeqCst);
                }
                FileStatus::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        FileOutcome { input, status }
    }

    /// Convert one file.
    ///
    /// # Errors
    ///
    /// Any stage's error; [`ConversionError::is_skip`] tells an unrecognized
    /// scan from a failure. No output file exists after an error.
    pub fn convert_file(&self, file: &DiscoveredFile) -> Result<ConvertedFile, ConversionError> {
        info!("Converting {}", file.path.display());
        let container = TwixFile::open(&file.path)?.into_container()?;
        let receiver_channels = container.receiver_channels();

        let classification = classify(
            &container.protocol,
            &container.records,
            self.settings.dixon.echoes,
        )?;
        let category = classification.category;
        if let Some(hint) = file.hint.filter(|hint| *hint != category) {
            warn!(
                "{}: file name suggests {} but the scan classifies as {}",
                file.path.display(),
                hint,
                category
            );
        }

        let settings = self.settings.category(category);
        let options = NormalizeOptions::new(&classification, settings);
        let params = ScanParameters::from_protocol(&container.protocol);
        let scan = normalize(&container.protocol, container.records, &options)?;

        let header = map_header(
            &params,
            &scan,
            category,
            self.settings.subject_id.as_deref(),
            receiver_channels,
            settings,
        )?;
        let superseded = scan.superseded.len();
        let dropped = scan.dropped;
        let available = header.system.receiver_channels.unwrap_or_default();
        let acquisitions = map_acquisitions(scan, &params, category, available)?;
        let dataset = MrdDataset::new(header, acquisitions);

        let output = self.claim_output(category, &file.path)?;
        if let Err(e) = write_dataset(&output, &dataset) {
            self.release_output(category, &file.path);
            return Err(e.into());
        }
        Ok(ConvertedFile {
            category,
            output,
            acquisitions: dataset.acquisitions().len(),
            superseded,
            dropped,
        })
    }

    /// Reserve the category's output name; a second file of the same
    /// category in one batch is a write failure.
    fn claim_output(&self, category: ScanCategory, input: &Path) -> Result<PathBuf, ConversionError> {
        let output = self.output_path(category);
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match claimed.get(&category) {
            Some(first) if first != input => Err(crate::mrd::MrdError::WriteFailure {
                path: output,
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("already written from {}", first.display()),
                ),
            }
            .into()),
            _ => {
                claimed.insert(category, input.to_path_buf());
                Ok(output)
            }
        }
    }

    /// Give up a claim after a failed write, so a later file of the same
    /// category can still produce the output.
    fn release_output(&self, category: ScanCategory, input: &Path) {
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if claimed.get(&category).is_some_and(|first| first == input) {
            claimed.remove(&category);
        }
    }
}
