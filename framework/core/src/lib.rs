mod bail;
mod shutdown;

pub mod prelude {
    pub use crate::bail::{InterruptedError, VuBailError};
    pub use crate::shutdown::{ShutdownHandle, ShutdownListener};
}
