//! pmon-plot - renders memory-usage charts from a pmon log file.
//!
//! Reads one log produced by `pmon`, reports its metadata, and draws
//! virtual-memory and resident-set curves against elapsed time. The
//! output format follows the file extension: `.svg` gets a vector
//! image, anything else a bitmap.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pmon::{Report, Snapshot, logfmt};

/// Chart generator for pmon logs.
#[derive(Parser)]
#[command(
    name = "pmon-plot",
    about = "Renders memory-usage charts from a pmon log",
    version
)]
struct Args {
    /// The pmon log file to read.
    input: PathBuf,

    /// Path of the output image (.svg or .png).
    #[arg(short, long, default_value = "pmon.svg")]
    output: PathBuf,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(quiet: bool) {
    let level = if quiet { Level::ERROR } else { Level::INFO };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pmon={level}").parse().unwrap());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.quiet);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!("could not open input file {}: {e}", args.input.display());
            return ExitCode::FAILURE;
        }
    };
    let report = match Report::parse(BufReader::new(file)) {
        Ok(r) => r,
        Err(e) => {
            error!("could not read input file {}: {e}", args.input.display());
            return ExitCode::FAILURE;
        }
    };

    info!("cmd:     {}", report.cmd);
    if let Some(freq) = report.freq {
        info!("freq:    {}", logfmt::format_duration(freq));
    }
    if let Some(start) = report.start {
        info!("start:   {start}");
    }
    if let Some(elapsed) = report.elapsed {
        info!("elapsed: {}", logfmt::format_duration(elapsed));
    }
    if let Some(stop) = report.stop {
        info!("stop:    {stop}");
    }
    for bad in &report.bad_lines {
        warn!("line {}: {} ({:?})", bad.line, bad.reason, bad.text);
    }

    if report.samples.is_empty() {
        error!("no samples in {}", args.input.display());
        return ExitCode::FAILURE;
    }

    let ext = args.output.extension().and_then(|e| e.to_str()).unwrap_or("");
    let rendered = if ext == "svg" {
        let root = SVGBackend::new(&args.output, (900, 640)).into_drawing_area();
        render(&root, &report)
    } else {
        let root = BitMapBackend::new(&args.output, (900, 640)).into_drawing_area();
        render(&root, &report)
    };
    match rendered {
        Ok(()) => {
            info!("wrote {}", args.output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("could not render plot: {e}");
            ExitCode::FAILURE
        }
    }
}

fn render<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    report: &Report,
) -> Result<(), Box<dyn std::error::Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 1));
    draw_panel(&panels[0], "VMem [MB]", &series(report, |s| s.vmem))?;
    draw_panel(&panels[1], "RSS [MB]", &series(report, |s| s.rss))?;
    root.present()?;
    Ok(())
}

/// Sample index times the sampling period on x, kilobytes scaled to
/// megabytes on y.
fn series(report: &Report, field: fn(&Snapshot) -> i64) -> Vec<(f64, f64)> {
    let freq = report.freq.unwrap_or(Duration::from_secs(1)).as_secs_f64();
    report
        .samples
        .iter()
        .enumerate()
        .map(|(i, s)| (i as f64 * freq, field(s) as f64 / 1024.0))
        .collect()
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    points: &[(f64, f64)],
) -> Result<(), Box<dyn std::error::Error>>
where
    DB::ErrorType: 'static,
{
    let x_max = points.last().map(|p| p.0).unwrap_or(0.0).max(1.0);
    let y_max = points.iter().map(|p| p.1).fold(0.0f64, f64::max).max(1.0);

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20).into_font())
        .margin(15)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_max, 0.0..y_max * 1.05)?;

    chart
        .configure_mesh()
        .x_desc("Time [s]")
        .y_desc(title)
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), RED.stroke_width(2)))?;
    Ok(())
}
