//! The line-oriented text format of the output log.
//!
//! Lines beginning with `#` carry metadata; every other line is one
//! sample of ten space-separated numeric fields:
//!
//! ```text
//! # pmon: sleep 3
//! # freq: 1s
//! # format: Snapshot { cpu: 0ns, ... }
//! # start: 2026-08-07T09:15:00.123456789Z
//! 12.000000 10.000000 2.000000 10240 1024 3 2048 1024 4 8
//! # elapsed: 3.0001s
//! # stop: 2026-08-07T09:15:03.123556789Z
//! ```
//!
//! The first three sample fields are CPU, user, and system time in
//! milliseconds; the remaining seven are integers that may be `-1` for a
//! counter the platform cannot report.

use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::snapshot::Snapshot;

/// Writes the metadata lines that precede the first sample.
pub fn write_header<W: Write + ?Sized>(
    w: &mut W,
    cmd: &str,
    freq: Duration,
    start: DateTime<Utc>,
) -> io::Result<()> {
    writeln!(w, "# pmon: {cmd}")?;
    writeln!(w, "# freq: {}", format_duration(freq))?;
    writeln!(w, "# format: {:?}", Snapshot::default())?;
    writeln!(w, "# start: {}", start.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Writes the metadata lines that follow the last sample.
pub fn write_footer<W: Write + ?Sized>(
    w: &mut W,
    elapsed: Duration,
    stop: DateTime<Utc>,
) -> io::Result<()> {
    writeln!(w, "# elapsed: {}", format_duration(elapsed))?;
    writeln!(w, "# stop: {}", stop.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Writes one sample line.
pub fn write_sample<W: Write + ?Sized>(w: &mut W, s: &Snapshot) -> io::Result<()> {
    writeln!(
        w,
        "{:.6} {:.6} {:.6} {} {} {} {} {} {} {}",
        millis(s.cpu),
        millis(s.user),
        millis(s.system),
        s.vmem,
        s.rss,
        s.threads,
        s.rchar,
        s.wchar,
        s.rdisk,
        s.wdisk,
    )
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

/// Formats a duration as a compact unit string: `0s`, `250µs`, `500ms`,
/// `1.5s`, `2m30s`, `1h0m3.0001s`.
///
/// Sub-second values pick the largest unit that keeps the integer part
/// non-zero; values of a second and up compose `h`/`m`/`s` components
/// with a fractional seconds part only when one exists.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return frac_unit(nanos, 1_000, "µs");
    }
    if nanos < 1_000_000_000 {
        return frac_unit(nanos, 1_000_000, "ms");
    }

    let secs = d.as_secs();
    let (hours, mins, secs) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || mins > 0 {
        out.push_str(&format!("{mins}m"));
    }
    out.push_str(&frac_unit(
        u128::from(secs) * 1_000_000_000 + u128::from(d.subsec_nanos()),
        1_000_000_000,
        "s",
    ));
    out
}

/// Renders `value / scale` with the fractional digits trimmed of
/// trailing zeros: `1500/1000 → "1.5"`, `2000/1000 → "2"`.
fn frac_unit(value: u128, scale: u128, unit: &str) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return format!("{whole}{unit}");
    }
    let width = scale.ilog10() as usize;
    let mut digits = format!("{frac:0width$}");
    while digits.ends_with('0') {
        digits.pop();
    }
    format!("{whole}.{digits}{unit}")
}

/// Parses a duration string composed of `<number><unit>` terms, such as
/// `1s`, `500ms`, `1.5h`, or `2m30s`. Units: `ns`, `us`/`µs`, `ms`,
/// `s`, `m`, `h`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s;
    let mut nanos = 0.0f64;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if num_end == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;
        rest = &rest[num_end..];

        let (scale, unit_len) = if rest.starts_with("ns") {
            (1.0, 2)
        } else if rest.starts_with("us") {
            (1e3, 2)
        } else if rest.starts_with("µs") {
            (1e3, "µs".len())
        } else if rest.starts_with("ms") {
            (1e6, 2)
        } else if rest.starts_with('s') {
            (1e9, 1)
        } else if rest.starts_with('m') {
            (60e9, 1)
        } else if rest.starts_with('h') {
            (3600e9, 1)
        } else {
            return Err(format!("unknown unit in duration {input:?}"));
        };
        nanos += value * scale;
        rest = &rest[unit_len..];
    }
    // Round rather than truncate so "2.3s" comes back as exactly
    // 2_300_000_000ns despite the intermediate float.
    Ok(Duration::from_nanos(nanos.round() as u64))
}
