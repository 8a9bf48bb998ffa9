use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use replicafs::cli::Cli;
use replicafs::config::ReplicaConfig;
use replicafs::constants::LOG_FILE_NAME;
use replicafs::{bootstrap, logging};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(Path::new(LOG_FILE_NAME)) {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    let config = match ReplicaConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match bootstrap::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
