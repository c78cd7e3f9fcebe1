//! Offline parser for pmon log files.
//!
//! Reconstructs the header/footer metadata and the ordered samples from
//! a log stream. A malformed line does not abort the parse: it is
//! recorded in [`Report::bad_lines`] and parsing continues, so one
//! corrupt sample cannot hide the rest of a long run.

use std::io::{self, BufRead};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::logfmt;
use crate::snapshot::Snapshot;

/// One line the parser could not make sense of.
#[derive(Debug, Clone)]
pub struct BadLine {
    /// 1-based line number in the input.
    pub line: usize,
    pub text: String,
    pub reason: String,
}

/// The reconstructed content of one log file.
#[derive(Debug, Default)]
pub struct Report {
    /// The monitored command line (`# pmon:`).
    pub cmd: String,
    /// Sampling period (`# freq:`).
    pub freq: Option<Duration>,
    /// The sample record layout descriptor (`# format:`), verbatim.
    pub format: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub elapsed: Option<Duration>,
    pub stop: Option<DateTime<Utc>>,
    /// Samples in file order.
    pub samples: Vec<Snapshot>,
    /// Lines that failed to parse, in file order.
    pub bad_lines: Vec<BadLine>,
}

impl Report {
    /// Parses a whole log stream. Only I/O failures abort the parse;
    /// content problems land in [`Report::bad_lines`].
    pub fn parse<R: BufRead>(reader: R) -> io::Result<Report> {
        let mut report = Report::default();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let outcome = if text.starts_with('#') {
                report.parse_meta(text)
            } else {
                parse_sample(text).map(|s| report.samples.push(s))
            };
            if let Err(reason) = outcome {
                report.bad_lines.push(BadLine {
                    line: idx + 1,
                    text: text.to_string(),
                    reason,
                });
            }
        }

        Ok(report)
    }

    fn parse_meta(&mut self, text: &str) -> Result<(), String> {
        if let Some(cmd) = text.strip_prefix("# pmon: ") {
            self.cmd = cmd.to_string();
        } else if let Some(freq) = text.strip_prefix("# freq: ") {
            self.freq = Some(logfmt::parse_duration(freq)?);
        } else if let Some(format) = text.strip_prefix("# format: ") {
            self.format = Some(format.to_string());
        } else if let Some(start) = text.strip_prefix("# start: ") {
            self.start = Some(parse_time(start)?);
        } else if let Some(elapsed) = text.strip_prefix("# elapsed: ") {
            self.elapsed = Some(logfmt::parse_duration(elapsed)?);
        } else if let Some(stop) = text.strip_prefix("# stop: ") {
            self.stop = Some(parse_time(stop)?);
        }
        // Unknown metadata lines pass through untouched; newer writers
        // may add lines an older reader does not know.
        Ok(())
    }
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp: {e}"))
}

/// Parses one ten-field sample line.
fn parse_sample(text: &str) -> Result<Snapshot, String> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 10 {
        return Err(format!("expected 10 fields, got {}", fields.len()));
    }

    let ms = |idx: usize, name: &str| -> Result<Duration, String> {
        let value: f64 = fields[idx]
            .parse()
            .map_err(|_| format!("invalid {name}: {:?}", fields[idx]))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("invalid {name}: {:?}", fields[idx]));
        }
        Ok(Duration::from_secs_f64(value / 1e3))
    };
    let int = |idx: usize, name: &str| -> Result<i64, String> {
        fields[idx]
            .parse()
            .map_err(|_| format!("invalid {name}: {:?}", fields[idx]))
    };

    Ok(Snapshot {
        cpu: ms(0, "cpu")?,
        user: ms(1, "user")?,
        system: ms(2, "system")?,
        vmem: int(3, "vmem")?,
        rss: int(4, "rss")?,
        threads: int(5, "threads")?,
        rchar: int(6, "rchar")?,
        wchar: int(7, "wchar")?,
        rdisk: int(8, "rdisk")?,
        wdisk: int(9, "wdisk")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    const LOG: &str = "\
# pmon: sleep 3
# freq: 1s
# format: Snapshot { cpu: 0ns }
# start: 2026-08-07T09:15:00.000000000Z
12.000000 10.000000 2.000000 10240 1024 3 2048 1024 4 8
13.500000 11.000000 2.500000 10240 1024 3 -1 -1 -1 -1
# elapsed: 3.0001s
# stop: 2026-08-07T09:15:03.000100000Z
";

    #[test]
    fn parses_metadata_and_samples_in_order() {
        let report = Report::parse(Cursor::new(LOG)).unwrap();

        assert_eq!(report.cmd, "sleep 3");
        assert_eq!(report.freq, Some(Duration::from_secs(1)));
        assert_eq!(report.format.as_deref(), Some("Snapshot { cpu: 0ns }"));
        assert_eq!(
            report.start,
            Some(Utc.with_ymd_and_hms(2026, 8, 7, 9, 15, 0).unwrap())
        );
        assert_eq!(
            report.elapsed,
            Some(Duration::from_secs(3) + Duration::from_micros(100))
        );
        assert!(report.stop.is_some());
        assert!(report.bad_lines.is_empty());

        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].vmem, 10240);
        assert_eq!(report.samples[0].rdisk, 4);
        assert_eq!(report.samples[1].rchar, -1);
        assert_eq!(report.samples[1].cpu, Duration::from_micros(13_500));
    }

    #[test]
    fn malformed_lines_are_collected_not_fatal() {
        let noisy = LOG.replacen(
            "13.500000 11.000000 2.500000 10240 1024 3 -1 -1 -1 -1",
            "13.5 11.0 garbage 10240 1024 3 -1 -1 -1 -1\nshort line",
            1,
        );
        let report = Report::parse(Cursor::new(noisy)).unwrap();

        // The good sample before the damage survives, the rest is
        // reported with positions.
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.bad_lines.len(), 2);
        assert_eq!(report.bad_lines[0].line, 6);
        assert!(report.bad_lines[0].reason.contains("system"));
        assert_eq!(report.bad_lines[1].line, 7);
        assert!(report.bad_lines[1].reason.contains("expected 10 fields"));
        assert!(report.elapsed.is_some());
    }

    #[test]
    fn negative_millisecond_fields_are_rejected() {
        let report = Report::parse(Cursor::new(
            "-5.0 1.0 1.0 0 0 0 0 0 0 0\n",
        ))
        .unwrap();
        assert!(report.samples.is_empty());
        assert_eq!(report.bad_lines.len(), 1);
    }

    #[test]
    fn unknown_metadata_is_ignored() {
        let report = Report::parse(Cursor::new("# host: example\n# pmon: true\n")).unwrap();
        assert_eq!(report.cmd, "true");
        assert!(report.bad_lines.is_empty());
    }

    #[test]
    fn sample_lines_round_trip_through_the_formatter() {
        let original = Snapshot {
            cpu: Duration::from_micros(12_250),
            user: Duration::from_micros(10_000),
            system: Duration::from_micros(2_250),
            vmem: 123456,
            rss: 7890,
            threads: 12,
            rchar: 555,
            wchar: 444,
            rdisk: -1,
            wdisk: -1,
        };
        let mut buf = Vec::new();
        logfmt::write_sample(&mut buf, &original).unwrap();
        let report = Report::parse(Cursor::new(buf)).unwrap();

        assert_eq!(report.samples.len(), 1);
        let parsed = &report.samples[0];
        // Integer fields are exact; millisecond fields are equal to
        // within the six printed decimal places.
        assert_eq!(parsed.vmem, original.vmem);
        assert_eq!(parsed.rss, original.rss);
        assert_eq!(parsed.threads, original.threads);
        assert_eq!(parsed.rchar, original.rchar);
        assert_eq!(parsed.wchar, original.wchar);
        assert_eq!(parsed.rdisk, original.rdisk);
        assert_eq!(parsed.wdisk, original.wdisk);
        for (got, want) in [
            (parsed.cpu, original.cpu),
            (parsed.user, original.user),
            (parsed.system, original.system),
        ] {
            let delta = got.abs_diff(want);
            assert!(delta < Duration::from_nanos(10), "{got:?} vs {want:?}");
        }
    }
}
