//! Platform-specific resource counter collection.
//!
//! A collector is bound to one pid at construction and reads fresh state
//! on every call; nothing is cached between ticks. Whatever handles it
//! holds are released on drop, whether or not the target still exists.

use std::time::Duration;

use crate::error::Error;
use crate::snapshot::Snapshot;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::ProcCollector as PlatformCollector;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::TaskInfoCollector as PlatformCollector;

/// Process-wide unit conversions, resolved once at startup.
///
/// Passed into collectors explicitly so tests can exercise the
/// conversions with known values instead of the running kernel's.
#[derive(Debug, Clone, Copy)]
pub struct Units {
    /// Kernel clock ticks per second (USER_HZ).
    pub clock_ticks: u64,
    /// Memory page size in bytes.
    pub page_size: u64,
}

impl Units {
    /// Reads the running kernel's tick rate and page size.
    pub fn detect() -> Units {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Units {
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
        }
    }

    /// Converts a clock-tick count to wall time.
    pub(crate) fn ticks(&self, ticks: u64) -> Duration {
        Duration::from_nanos(ticks * (1_000_000_000 / self.clock_ticks))
    }
}

/// One-process counter source.
pub trait Collect {
    /// Reads one fresh [`Snapshot`] of the target's counters.
    fn collect(&mut self) -> Result<Snapshot, Error>;
}

/// Opens a collector for `pid` using the platform's native counter
/// source.
pub fn open(pid: i32, units: Units) -> Result<PlatformCollector, Error> {
    PlatformCollector::open(pid, units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_returns_plausible_units() {
        let units = Units::detect();
        assert!(units.clock_ticks >= 1);
        assert!(units.page_size >= 512);
    }

    #[test]
    fn tick_conversion_uses_injected_rate() {
        let units = Units { clock_ticks: 100, page_size: 4096 };
        assert_eq!(units.ticks(0), Duration::ZERO);
        assert_eq!(units.ticks(1), Duration::from_millis(10));
        assert_eq!(units.ticks(250), Duration::from_millis(2500));

        let units = Units { clock_ticks: 1000, page_size: 4096 };
        assert_eq!(units.ticks(3), Duration::from_millis(3));
    }
}
