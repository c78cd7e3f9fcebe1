//! pmon - monitor the resource usage of one process.
//!
//! Spawns a command (or attaches to a pid) and appends one line of
//! counters per sampling tick to a log file, for later analysis with
//! `pmon-plot`.

use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pmon::{Session, logfmt};

/// Single-process resource monitor.
#[derive(Parser)]
#[command(
    name = "pmon",
    about = "Samples CPU, memory, thread and I/O counters of one process",
    version
)]
struct Args {
    /// Sampling interval (e.g. "1s", "500ms").
    #[arg(short, long, default_value = "1s", value_parser = parse_freq)]
    freq: Duration,

    /// Path of the output log file.
    #[arg(short, long, default_value = "pmon.data")]
    output: PathBuf,

    /// Attach to an already-running process instead of spawning one.
    #[arg(short, long, conflicts_with = "command")]
    pid: Option<i32>,

    /// Command to spawn and monitor.
    #[arg(required_unless_present = "pid")]
    command: Option<String>,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Increase logging verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_freq(s: &str) -> Result<Duration, String> {
    let freq = logfmt::parse_duration(s)?;
    if freq.is_zero() {
        return Err("sampling interval must be positive".to_string());
    }
    Ok(freq)
}

/// Initializes the tracing subscriber. Diagnostics go to stderr; stdout
/// belongs to the monitored command.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pmon={level}").parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Some(dir) = args.output.parent()
        && !dir.as_os_str().is_empty()
        && let Err(e) = fs::create_dir_all(dir)
    {
        error!("could not create output directory {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }

    let file = match fs::File::create(&args.output) {
        Ok(f) => f,
        Err(e) => {
            error!("could not create output log file {}: {e}", args.output.display());
            return ExitCode::FAILURE;
        }
    };

    let mut session = match (args.pid, args.command) {
        (Some(pid), _) => match Session::attach(pid) {
            Ok(s) => s,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        (None, Some(command)) => Session::spawn(command, args.args),
        // clap's required_unless_present makes this unreachable.
        (None, None) => return ExitCode::FAILURE,
    };
    session.freq = args.freq;
    session.sink = Box::new(BufWriter::new(file));

    let handle = session.handle();
    let attached = args.pid.is_some();
    if let Err(e) = ctrlc::set_handler(move || {
        if attached {
            info!("received shutdown signal");
            handle.stop();
        } else if let Err(e) = handle.kill() {
            if e.target_already_gone() {
                info!("monitored process already exited");
            } else {
                error!("could not kill monitored process: {e}");
            }
        }
    }) {
        warn!("could not set signal handler: {e}");
    }

    match session.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
