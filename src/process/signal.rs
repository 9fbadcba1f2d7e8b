// src/process/signal.rs

//! Process-group signalling.
//!
//! Every managed child is spawned as the leader of its own process group, so
//! its pid doubles as the group id and signalling the group reaches
//! grandchildren too (shell wrappers, `npm run` chains, ...).

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Polite request (SIGTERM).
    Terminate,
    /// Forced kill after the grace period (SIGKILL).
    Kill,
}

/// Send `signal` to the process group led by `pgid`.
///
/// A group that no longer exists is not an error.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: StopSignal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let sig = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(pgid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: StopSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are only supported on unix",
    ))
}
