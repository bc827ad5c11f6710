//! OS process primitives used by the supervisor.
//!
//! Unix gets real signals (SIGTERM, then SIGKILL); Windows has no graceful
//! signal for a windowless child, so stopping means a forced tree kill.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;

/// File name of the packaged backend executable.
pub fn executable_name() -> &'static str {
    if cfg!(windows) {
        "app.exe"
    } else {
        "app"
    }
}
