mod cli;
mod config;
mod context;
mod definition;
mod dispatch;
mod driver;
mod executors;
mod init;
mod io_executor;
mod progress;
mod run;
mod scheduler;
mod types;
mod vu;

pub mod prelude {
    pub use crate::cli::ScenarioCli;
    pub use crate::config::{ConfigError, ExecutorConfig, Stage};
    pub use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
    pub use crate::definition::{HookResult, ScenarioDefinition, ScenarioDefinitionBuilder, VuHook};
    pub use crate::dispatch::WeightedChoice;
    pub use crate::driver::{Outcome, ProtocolDriver};
    pub use crate::init::init;
    pub use crate::io_executor::IoExecutor;
    pub use crate::run::{run, GlobalHook, GlobalTeardownHook, TestRun};
    pub use crate::types::SlipstreamResult;

    pub use slipstream_core::prelude::*;
    pub use slipstream_metrics::prelude::*;
}
