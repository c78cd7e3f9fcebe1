//! Error types for session setup, the trace handshake, and sampling.

use std::fmt;
use std::io;

/// Errors surfaced by [`crate::session::Session`] and the collectors.
#[derive(Debug)]
pub enum Error {
    /// Spawning the target command failed.
    Start(io::Error),
    /// The pid handed to `attach` does not name a live, visible process.
    ProcessNotFound(i32),
    /// The initial stop-wait failed, or the trace detach failed twice.
    TraceHandshake(io::Error),
    /// A counter read failed. Fatal when opening the collector,
    /// per-tick occurrences are logged and skipped.
    Collection(io::Error),
    /// Writing the header, footer, or a sample line to the sink failed.
    SinkWrite(io::Error),
    /// Signalling the target's process group failed.
    Kill(io::Error),
    /// Kill was requested for a session that attached to an existing
    /// process; there is no process group under our control.
    NotSpawned,
}

impl Error {
    /// True when a kill failed only because the target process group no
    /// longer exists. Callers treat this as "already stopped".
    pub fn target_already_gone(&self) -> bool {
        matches!(self, Error::Kill(e) if e.raw_os_error() == Some(libc::ESRCH))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Start(e) => write!(f, "could not start process: {e}"),
            Error::ProcessNotFound(pid) => {
                write!(f, "could not find process with pid={pid}")
            }
            Error::TraceHandshake(e) => write!(f, "trace handshake failed: {e}"),
            Error::Collection(e) => write!(f, "error collecting counters: {e}"),
            Error::SinkWrite(e) => write!(f, "error writing log file: {e}"),
            Error::Kill(e) => write!(f, "could not kill process group: {e}"),
            Error::NotSpawned => {
                write!(f, "session did not spawn its target; no process group to kill")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Start(e)
            | Error::TraceHandshake(e)
            | Error::Collection(e)
            | Error::SinkWrite(e)
            | Error::Kill(e) => Some(e),
            Error::ProcessNotFound(_) | Error::NotSpawned => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_esrch_reads_as_already_gone() {
        let err = Error::Kill(io::Error::from_raw_os_error(libc::ESRCH));
        assert!(err.target_already_gone());

        let err = Error::Kill(io::Error::from_raw_os_error(libc::EPERM));
        assert!(!err.target_already_gone());

        assert!(!Error::NotSpawned.target_already_gone());
    }
}
