//! # twix2mrd
//!
//! Command-line front end for converting a subject's Siemens twix files into
//! consortium MRD files.
//!
//! ## Usage
//!
//! ```bash
//! # Convert every twix file listed by a subject configuration
//! twix2mrd -v convert 007-005B.toml --report report.json
//!
//! # Summarize a written MRD file
//! twix2mrd info 007-005B_dixon.mrd
//!
//! # Show what the converter reads from a twix file
//! twix2mrd inspect meas_MID00042_FID12345_xe_dixon.dat
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
