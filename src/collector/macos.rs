//! Counter collection through the macOS task-info facility.
//!
//! `proc_pidinfo(PROC_PIDTASKALLINFO)` exposes CPU time, memory, and the
//! thread count, but macOS has no per-process I/O accounting, so all four
//! I/O counters report the unsupported sentinel.

use std::io;
use std::time::Duration;

use super::{Collect, Units};
use crate::error::Error;
use crate::snapshot::{Snapshot, UNSUPPORTED};

pub struct TaskInfoCollector {
    pid: i32,
}

impl TaskInfoCollector {
    pub(crate) fn open(pid: i32, _units: Units) -> Result<TaskInfoCollector, Error> {
        // Probe once so a bogus pid fails at construction, like the
        // procfs open does on Linux.
        let mut collector = TaskInfoCollector { pid };
        collector.collect()?;
        Ok(collector)
    }

    fn task_info(&self) -> io::Result<libc::proc_taskallinfo> {
        let mut info: libc::proc_taskallinfo = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::proc_taskallinfo>() as libc::c_int;
        let n = unsafe {
            libc::proc_pidinfo(
                self.pid,
                libc::PROC_PIDTASKALLINFO,
                0,
                &mut info as *mut _ as *mut libc::c_void,
                size,
            )
        };
        if n != size {
            return Err(io::Error::last_os_error());
        }
        Ok(info)
    }
}

impl Collect for TaskInfoCollector {
    fn collect(&mut self) -> Result<Snapshot, Error> {
        let info = self.task_info().map_err(Error::Collection)?;

        let user = Duration::from_nanos(info.ptinfo.pti_total_user);
        let system = Duration::from_nanos(info.ptinfo.pti_total_system);
        Ok(Snapshot {
            cpu: user + system,
            user,
            system,
            vmem: (info.ptinfo.pti_virtual_size / 1024) as i64,
            rss: (info.ptinfo.pti_resident_size / 1024) as i64,
            threads: info.ptinfo.pti_threadnum as i64,
            rchar: UNSUPPORTED,
            wchar: UNSUPPORTED,
            rdisk: UNSUPPORTED,
            wdisk: UNSUPPORTED,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector;

    #[test]
    fn own_process_reports_counters_and_io_sentinels() {
        let pid = std::process::id() as i32;
        let mut collector = collector::open(pid, Units::detect()).unwrap();
        let snap = collector.collect().unwrap();

        assert!(snap.threads >= 1);
        assert!(snap.rss > 0);
        assert_eq!(snap.rchar, UNSUPPORTED);
        assert_eq!(snap.wchar, UNSUPPORTED);
        assert_eq!(snap.rdisk, UNSUPPORTED);
        assert_eq!(snap.wdisk, UNSUPPORTED);
    }
}
