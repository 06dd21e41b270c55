//! Names of the metrics that the runner records for every scenario.
//!
//! Custom metrics recorded by scenario code share the same namespace, so scenario authors
//! should avoid these names for their own trends and rates.

pub const REQUEST_DURATION: &str = "request_duration";
pub const REQUEST_FAILED: &str = "request_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATIONS_ABORTED: &str = "iterations_aborted";
pub const ITERATION_ERRORS: &str = "iteration_errors";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
pub const CHECKS: &str = "checks";

/// The rate metric for a single named check.
pub fn check(name: &str) -> String {
    format!("checks.{name}")
}
