use clap::Parser;

use crate::cli::ScenarioCli;

/// Initialise logging and parse the command line for a scenario binary.
pub fn init() -> ScenarioCli {
    env_logger::init();

    ScenarioCli::parse()
}
