//! The per-tick sample record.

use std::time::Duration;

/// Sentinel for a counter the platform cannot report.
///
/// Distinct from zero: a `0` means "measured, nothing happened", `-1`
/// means "this platform has no per-process source for this number".
pub const UNSUPPORTED: i64 = -1;

/// One point-in-time measurement of a process's resource usage.
///
/// Memory and I/O fields are kilobytes. I/O fields are [`UNSUPPORTED`]
/// on platforms without per-process I/O accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Total CPU time, user + system.
    pub cpu: Duration,
    /// Time spent in user mode.
    pub user: Duration,
    /// Time spent in kernel mode.
    pub system: Duration,
    /// Virtual memory size in kB.
    pub vmem: i64,
    /// Resident set size in kB.
    pub rss: i64,
    /// Number of threads.
    pub threads: i64,
    /// Bytes read by the process in kB, including page-cache hits.
    pub rchar: i64,
    /// Bytes written by the process in kB, including page-cache hits.
    pub wchar: i64,
    /// Bytes fetched from the storage layer in kB.
    pub rdisk: i64,
    /// Bytes sent to the storage layer in kB.
    pub wdisk: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_zero() {
        let s = Snapshot::default();
        assert_eq!(s.cpu, Duration::ZERO);
        assert_eq!(s.vmem, 0);
        assert_eq!(s.rdisk, 0);
    }

    #[test]
    fn debug_names_every_field() {
        // The log header embeds this rendering as the format description.
        let text = format!("{:?}", Snapshot::default());
        for field in [
            "cpu", "user", "system", "vmem", "rss", "threads", "rchar", "wchar", "rdisk", "wdisk",
        ] {
            assert!(text.contains(field), "missing {field} in {text}");
        }
    }
}
