/// Return this error from a virtual user's hook to retire that VU without ending the scenario.
///
/// This should be used when a VU hits a fault that it cannot recover from but which does not
/// invalidate the rest of the run. For example, if a VU loses its connection to the target and
/// cannot re-establish it, that VU may bail while the remaining VUs keep generating traffic.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct VuBailError {
    msg: String,
}

impl Default for VuBailError {
    fn default() -> Self {
        Self {
            msg: "Virtual user is bailing".to_string(),
        }
    }
}

/// Raised when an in-flight operation is cancelled by a hard abort.
///
/// Iterations that fail with this error are recorded as aborted, not as request failures.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct InterruptedError {
    msg: String,
}

impl Default for InterruptedError {
    fn default() -> Self {
        Self {
            msg: "Operation cancelled by abort signal".to_string(),
        }
    }
}
