use std::fmt;
use std::path::PathBuf;

#[cfg(feature = "colorized_output")]
use console::style;
use serde::Serialize;

use super::ErrorKind;
use crate::classify::ScanCategory;

/// What happened to one input file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// MRD file written
    Converted {
        /// Scan category
        category: ScanCategory,
        /// Output path
        output: PathBuf,
        /// Acquisitions written
        acquisitions: usize,
        /// Duplicates replaced by later records
        superseded: usize,
    },
    /// Not a consortium scan
    Skipped {
        /// Why the file was skipped
        reason: String,
    },
    /// Conversion failed
    Failed {
        /// Failure category
        kind: ErrorKind,
        /// Error message
        message: String,
    },
    /// Batch aborted before this file was started
    NotAttempted,
}

/// Result for one input file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    /// Input path
    pub input: PathBuf,
    /// Outcome
    #[serde(flatten)]
    pub status: FileStatus,
}

impl FileOutcome {
    /// Whether an output file was written
    pub fn is_converted(&self) -> bool {
        matches!(self.status, FileStatus::Converted { .. })
    }

    /// Whether the file was skipped as unrecognized
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, FileStatus::Skipped { .. })
    }

    /// Whether the file failed or was never attempted
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status,
            FileStatus::Failed { .. } | FileStatus::NotAttempted
        )
    }
}

/// Outcome of a batch conversion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionSummary {
    /// Subject the files belong to
    pub subject_id: Option<String>,
    /// Per-file results in input order
    pub files: Vec<FileOutcome>,
}

impl ConversionSummary {
    /// Number of converted files
    pub fn converted_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_converted()).count()
    }

    /// Number of skipped files
    pub fn skipped_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_skipped()).count()
    }

    /// Number of failed or unattempted files
    pub fn failed_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_failed()).count()
    }

    /// Process exit status: 0 when nothing failed, 2 for a partial success,
    /// 1 when something failed and nothing converted.
    pub fn exit_code(&self) -> i32 {
        match (self.failed_count(), self.converted_count()) {
            (0, _) => 0,
            (_, 0) => 1,
            _ => 2,
        }
    }

    /// JSON report
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Format the summary with colors (requires console feature)
    pub fn format_colored(&self) -> String {
        #[cfg(feature = "colorized_output")]
        {
            use console::Emoji;

            static OK: Emoji<'_, '_> = Emoji("✓", "[OK]");
            static SKIP: Emoji<'_, '_> = Emoji("-", "[SKIP]");
            static FAIL: Emoji<'_, '_> = Emoji("✗", "[FAIL]");

            let mut output = String::new();
            output.push_str(&format!("{}\n", style("twix2mrd Conversion Summary").bold().cyan()));
            output.push_str(&format!("{}\n", style("===========================").cyan()));
            if let Some(subject) = &self.subject_id {
                output.push_str(&format!("{}: {}\n", style("Subject").bold(), subject));
            }
            output.push('\n');

            for file in &self.files {
                let input = file.input.display();
                match &file.status {
                    FileStatus::Converted {
                        category,
                        output: path,
                        acquisitions,
                        ..
                    } => output.push_str(&format!(
                        "[{}] {} -> {} ({}, {} acquisitions)\n",
                        OK,
                        style(input).green(),
                        path.display(),
                        category,
                        acquisitions
                    )),
                    FileStatus::Skipped { reason } => output.push_str(&format!(
                        "[{}] {} - {}: {}\n",
                        SKIP,
                        style(input).dim(),
                        style("SKIPPED").yellow().bold(),
                        reason
                    )),
                    FileStatus::Failed { kind, message } => output.push_str(&format!(
                        "[{}] {} - {} ({}): {}\n",
                        FAIL,
                        style(input).red(),
                        style("FAILED").red().bold(),
                        kind,
                        message
                    )),
                    FileStatus::NotAttempted => output.push_str(&format!(
                        "[{}] {} - {}\n",
                        FAIL,
                        style(input).red(),
                        style("NOT ATTEMPTED").red()
                    )),
                }
            }

            output.push('\n');
            output.push_str(&format!(
                "{}: {} converted, {} skipped, {} failed\n",
                style("Summary").bold(),
                style(self.converted_count()).green(),
                style(self.skipped_count()).yellow(),
                style(self.failed_count()).red()
            ));
            output
        }

        #[cfg(not(feature = "colorized_output"))]
        {
            format!("{}", self)
        }
    }
}

impl fmt::Display for ConversionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "twix2mrd Conversion Summary")?;
        writeln!(f, "===========================")?;
        if let Some(subject) = &self.subject_id {
            writeln!(f, "Subject: {}", subject)?;
        }
        writeln!(f)?;

        for file in &self.files {
            let input = file.input.display();
            match &file.status {
                FileStatus::Converted {
                    category,
                    output,
                    acquisitions,
                    ..
                } => writeln!(
                    f,
                    "[✓] {} -> {} ({}, {} acquisitions)",
                    input,
                    output.display(),
                    category,
                    acquisitions
                )?,
                FileStatus::Skipped { reason } => writeln!(f, "[-] {} - SKIPPED: {}", input, reason)?,
                FileStatus::Failed { kind, message } => {
                    writeln!(f, "[✗] {} - FAILED ({}): {}", input, kind, message)?
                }
                FileStatus::NotAttempted => writeln!(f, "[✗] {} - NOT ATTEMPTED", input)?,
            }
        }

        writeln!(f)?;
        writeln!(
            f,
            "Summary: {} converted, {} skipped, {} failed",
            self.converted_count(),
            self.skipped_count(),
            self.failed_count()
        )
    }
}
