use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod convert;
mod info;
mod inspect;

/// twix2mrd - Siemens twix to MRD converter for 129Xe MRI
#[derive(Parser)]
#[command(name = "twix2mrd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a subject's twix files to MRD
    Convert {
        /// Subject configuration (TOML)
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Write a JSON report of per-file outcomes
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Convert files one at a time
        #[arg(long)]
        sequential: bool,

        /// Stop starting new files after the first failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Display information about an MRD file
    Info {
        /// Input MRD file path
        #[arg(value_name = "MRD")]
        file: PathBuf,
    },

    /// Show protocol parameters and classification of a twix file
    Inspect {
        /// Input twix file path
        #[arg(value_name = "TWIX")]
        file: PathBuf,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Convert {
            config,
            report,
            sequential,
            fail_fast,
        } => {
            let code = convert::run(config, report, !sequential, fail_fast)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Info { file } => info::run(file),
        Commands::Inspect { file } => inspect::run(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_convert() {
        let cli = Cli::try_parse_from([
            "twix2mrd",
            "-vv",
            "convert",
            "subject.toml",
            "--report",
            "out.json",
            "--sequential",
        ])
        .unwrap();
        assert_eq!(cli.verbosity(), 2);
        match cli.command {
            Commands::Convert {
                config,
                report,
                sequential,
                fail_fast,
            } => {
                assert_eq!(config, PathBuf::from("subject.toml"));
                assert_eq!(report, Some(PathBuf::from("out.json")));
                assert!(sequential);
                assert!(!fail_fast);
            }
            _ => panic!("expected convert"),
        }
    }
}
