//! Counter collection from `/proc/<pid>/stat` and `/proc/<pid>/io`.
//!
//! Both files are opened once and held for the collector's lifetime;
//! each tick rewinds and re-reads them. See proc(5) for the layouts.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use super::{Collect, Units};
use crate::error::Error;
use crate::snapshot::Snapshot;

/// The fields of `/proc/<pid>/stat` the sampler cares about.
#[derive(Debug, Default, PartialEq)]
struct StatCounters {
    /// User-mode time in clock ticks.
    utime: u64,
    /// Kernel-mode time in clock ticks.
    stime: u64,
    threads: i64,
    /// Virtual memory size in bytes.
    vsize: u64,
    /// Resident set size in pages.
    rss_pages: i64,
}

/// The fields of `/proc/<pid>/io` the sampler cares about, in bytes.
#[derive(Debug, Default, PartialEq)]
struct IoCounters {
    rchar: u64,
    wchar: u64,
    read_bytes: u64,
    write_bytes: u64,
}

pub struct ProcCollector {
    stat: File,
    io: File,
    units: Units,
}

impl ProcCollector {
    pub(crate) fn open(pid: i32, units: Units) -> Result<ProcCollector, Error> {
        Self::open_at(Path::new("/proc"), pid, units).map_err(Error::Collection)
    }

    /// Opens the collector against an arbitrary proc root, so tests can
    /// point it at a fabricated tree.
    fn open_at(root: &Path, pid: i32, units: Units) -> io::Result<ProcCollector> {
        let dir = root.join(pid.to_string());
        let stat = File::open(dir.join("stat"))?;
        let io = File::open(dir.join("io"))?;
        Ok(ProcCollector { stat, io, units })
    }

    fn read_rewound(file: &mut File) -> io::Result<String> {
        file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        Ok(content)
    }
}

impl Collect for ProcCollector {
    fn collect(&mut self) -> Result<Snapshot, Error> {
        let stat = Self::read_rewound(&mut self.stat)
            .and_then(|content| parse_stat(&content))
            .map_err(Error::Collection)?;
        let io = Self::read_rewound(&mut self.io)
            .and_then(|content| parse_io(&content))
            .map_err(Error::Collection)?;

        let user = self.units.ticks(stat.utime);
        let system = self.units.ticks(stat.stime);
        Ok(Snapshot {
            cpu: user + system,
            user,
            system,
            vmem: (stat.vsize / 1024) as i64,
            rss: stat.rss_pages * self.units.page_size as i64 / 1024,
            threads: stat.threads,
            rchar: (io.rchar / 1024) as i64,
            wchar: (io.wchar / 1024) as i64,
            rdisk: (io.read_bytes / 1024) as i64,
            wdisk: (io.write_bytes / 1024) as i64,
        })
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Parses `/proc/<pid>/stat`. The comm field is enclosed in parentheses
/// and may itself contain spaces and parentheses, so the split starts
/// after the last `)`.
fn parse_stat(content: &str) -> io::Result<StatCounters> {
    let close = content
        .rfind(')')
        .ok_or_else(|| invalid("stat: missing ')'".into()))?;
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    // Fields after the comm, 0-indexed: 0 state, 11 utime, 12 stime,
    // 17 num_threads, 20 vsize, 21 rss.
    if fields.len() < 22 {
        return Err(invalid(format!(
            "stat: expected at least 22 fields after comm, got {}",
            fields.len()
        )));
    }

    let uint = |idx: usize, name: &str| -> io::Result<u64> {
        fields[idx]
            .parse()
            .map_err(|_| invalid(format!("stat: invalid {name}: {:?}", fields[idx])))
    };
    let int = |idx: usize, name: &str| -> io::Result<i64> {
        fields[idx]
            .parse()
            .map_err(|_| invalid(format!("stat: invalid {name}: {:?}", fields[idx])))
    };

    Ok(StatCounters {
        utime: uint(11, "utime")?,
        stime: uint(12, "stime")?,
        threads: int(17, "num_threads")?,
        vsize: uint(20, "vsize")?,
        rss_pages: int(21, "rss")?,
    })
}

/// Parses `/proc/<pid>/io`, a sequence of `name: value` lines.
fn parse_io(content: &str) -> io::Result<IoCounters> {
    let mut rchar = None;
    let mut wchar = None;
    let mut read_bytes = None;
    let mut write_bytes = None;

    for line in content.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let slot = match name {
            "rchar" => &mut rchar,
            "wchar" => &mut wchar,
            "read_bytes" => &mut read_bytes,
            "write_bytes" => &mut write_bytes,
            _ => continue,
        };
        *slot = Some(
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(format!("io: invalid {name}: {:?}", value.trim())))?,
        );
    }

    match (rchar, wchar, read_bytes, write_bytes) {
        (Some(rchar), Some(wchar), Some(read_bytes), Some(write_bytes)) => Ok(IoCounters {
            rchar,
            wchar,
            read_bytes,
            write_bytes,
        }),
        _ => Err(invalid("io: missing counter line".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    const STAT_LINE: &str = "1234 (cat) R 1 1234 1234 0 -1 4194304 171 0 0 0 \
                             150 25 0 0 20 0 3 0 5837495 10485760 256 \
                             18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";

    const IO_TEXT: &str = "rchar: 2097152\nwchar: 1048576\nsyscr: 6\nsyscw: 0\n\
                           read_bytes: 4096\nwrite_bytes: 8192\ncancelled_write_bytes: 0\n";

    fn units() -> Units {
        Units { clock_ticks: 100, page_size: 4096 }
    }

    #[test]
    fn stat_extracts_the_sampled_fields() {
        let stat = parse_stat(STAT_LINE).unwrap();
        assert_eq!(
            stat,
            StatCounters {
                utime: 150,
                stime: 25,
                threads: 3,
                vsize: 10485760,
                rss_pages: 256,
            }
        );
    }

    #[test]
    fn stat_tolerates_hostile_comm() {
        // Kernel threads and renamed processes put spaces, parentheses,
        // and digits inside the comm field.
        let line = STAT_LINE.replacen("(cat)", "(Web (Content) 2)", 1);
        let stat = parse_stat(&line).unwrap();
        assert_eq!(stat.utime, 150);
        assert_eq!(stat.threads, 3);
    }

    #[test]
    fn stat_rejects_truncated_content() {
        assert!(parse_stat("1234 (cat) R 1").is_err());
        assert!(parse_stat("no parens at all").is_err());
    }

    #[test]
    fn io_extracts_all_four_counters() {
        let io = parse_io(IO_TEXT).unwrap();
        assert_eq!(
            io,
            IoCounters {
                rchar: 2097152,
                wchar: 1048576,
                read_bytes: 4096,
                write_bytes: 8192,
            }
        );
    }

    #[test]
    fn io_rejects_missing_counters() {
        assert!(parse_io("rchar: 1\nwchar: 2\n").is_err());
        assert!(parse_io("").is_err());
    }

    #[test]
    fn collect_converts_to_kilobytes_and_durations() {
        let dir = tempfile::tempdir().unwrap();
        let proc_dir = dir.path().join("4242");
        fs::create_dir(&proc_dir).unwrap();
        fs::write(proc_dir.join("stat"), STAT_LINE).unwrap();
        fs::write(proc_dir.join("io"), IO_TEXT).unwrap();

        let mut collector = ProcCollector::open_at(dir.path(), 4242, units()).unwrap();
        let snap = collector.collect().unwrap();

        assert_eq!(snap.user, Duration::from_millis(1500));
        assert_eq!(snap.system, Duration::from_millis(250));
        assert_eq!(snap.cpu, Duration::from_millis(1750));
        assert_eq!(snap.vmem, 10240); // 10 MiB in kB
        assert_eq!(snap.rss, 1024); // 256 pages * 4096 B
        assert_eq!(snap.threads, 3);
        assert_eq!(snap.rchar, 2048);
        assert_eq!(snap.wchar, 1024);
        assert_eq!(snap.rdisk, 4);
        assert_eq!(snap.wdisk, 8);
    }

    #[test]
    fn collect_rereads_fresh_state_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let proc_dir = dir.path().join("7");
        fs::create_dir(&proc_dir).unwrap();
        fs::write(proc_dir.join("stat"), STAT_LINE).unwrap();
        fs::write(proc_dir.join("io"), IO_TEXT).unwrap();

        let mut collector = ProcCollector::open_at(dir.path(), 7, units()).unwrap();
        assert_eq!(collector.collect().unwrap().user, Duration::from_millis(1500));

        fs::write(proc_dir.join("stat"), STAT_LINE.replacen(" 150 25 ", " 300 25 ", 1)).unwrap();
        assert_eq!(collector.collect().unwrap().user, Duration::from_millis(3000));
    }

    #[test]
    fn open_fails_for_absent_pid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProcCollector::open_at(dir.path(), 1, units()).is_err());
    }
}
