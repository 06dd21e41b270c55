use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(about, long_about = None)]
pub struct ScenarioCli {
    /// Override the run deadline in seconds.
    ///
    /// Scenarios still follow their configured stages; the deadline simply drains the run
    /// early if it fires first.
    #[clap(long)]
    pub duration: Option<u64>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at
    /// by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Write the final report as JSON to this path, in addition to the stdout summary.
    #[clap(long)]
    pub summary_json: Option<PathBuf>,
}
