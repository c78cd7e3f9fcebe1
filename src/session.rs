//! Session lifecycle: spawn-or-attach, the trace handshake, the
//! sampling loop, and shutdown.
//!
//! A session either spawns its target under trace control (so the first
//! sample is guaranteed to land before the target's first instruction)
//! or attaches read-only to an already-running pid. Both modes share the
//! sampling loop and the log writer; only the lifecycle around them
//! differs.

use std::fmt;
use std::io::{self, Write};
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::{Pid, getpgid};
use tracing::{debug, info, warn};

use crate::collector::{self, Collect, PlatformCollector, Units};
use crate::error::Error;
use crate::logfmt;
use crate::trace::{self, TraceExecutor};

/// What a session monitors. Exactly one variant is ever in play; the
/// run and kill paths dispatch on it.
#[derive(Debug, Clone)]
pub enum Target {
    /// A command the session spawns, traces, and owns the process group
    /// of.
    Spawn { program: String, args: Vec<String> },
    /// A process somebody else owns; sampling is read-only and there is
    /// nothing to trace or kill.
    Attach { pid: i32 },
}

/// Session lifecycle states. A session never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Stopped,
}

/// Shared control surface between a running session, its sampling loop,
/// and any [`Handle`]s held by other threads.
struct Control {
    /// Target pid; 0 until the child has been spawned.
    pid: AtomicI32,
    /// Cleared once the target is known to have exited.
    alive: AtomicBool,
    /// Spawn mode owns a process group it may signal.
    spawned: bool,
    stop: mpsc::Sender<()>,
}

impl Control {
    fn request_stop(&self) {
        // Fails only when the loop is already gone, which is the goal.
        let _ = self.stop.send(());
    }

    fn kill(&self) -> Result<(), Error> {
        if !self.spawned {
            return Err(Error::NotSpawned);
        }
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return Err(Error::Kill(io::Error::new(
                io::ErrorKind::NotFound,
                "target has not been started",
            )));
        }
        let pgid = getpgid(Some(Pid::from_raw(pid))).map_err(|e| Error::Kill(e.into()))?;
        // The negative pid addresses every process in the group, so
        // descendants of the target die with it.
        signal::kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGKILL)
            .map_err(|e| Error::Kill(e.into()))
    }

    fn target_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let pid = self.pid.load(Ordering::SeqCst);
        pid != 0 && signal::kill(Pid::from_raw(pid), None).is_ok()
    }
}

/// Clonable control handle for stopping or killing a running session
/// from another thread, typically a signal handler.
#[derive(Clone)]
pub struct Handle {
    control: Arc<Control>,
}

impl Handle {
    /// Terminates the whole process group of a spawned target.
    ///
    /// Fails with [`Error::NotSpawned`] for attach-mode sessions, and
    /// with the OS "no such process" error when the group already
    /// exited; see [`Error::target_already_gone`].
    pub fn kill(&self) -> Result<(), Error> {
        self.control.kill()
    }

    /// Asks the sampling loop to stop after any in-flight sample. This
    /// is how attach-mode sessions are shut down.
    pub fn stop(&self) {
        self.control.request_stop();
    }
}

/// One monitoring run over one target process.
pub struct Session {
    target: Target,
    /// Sampling period.
    pub freq: Duration,
    /// Delay before the single trace-detach retry.
    pub detach_retry: Duration,
    /// Destination of the formatted log. Discards by default.
    pub sink: Box<dyn Write + Send>,
    units: Units,
    state: State,
    control: Arc<Control>,
    stop_rx: Option<mpsc::Receiver<()>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("freq", &self.freq)
            .field("detach_retry", &self.detach_retry)
            .field("sink", &"<dyn Write>")
            .field("units", &self.units)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Prepares a session that will spawn `program` under trace control,
    /// with stdio inherited and process-group leadership enabled.
    pub fn spawn(program: impl Into<String>, args: Vec<String>) -> Session {
        Session::new(Target::Spawn { program: program.into(), args }, true)
    }

    /// Prepares a session that samples an already-running process.
    ///
    /// Fails with [`Error::ProcessNotFound`] when `pid` does not name a
    /// live process we are allowed to see.
    pub fn attach(pid: i32) -> Result<Session, Error> {
        if signal::kill(Pid::from_raw(pid), None).is_err() {
            return Err(Error::ProcessNotFound(pid));
        }
        Ok(Session::new(Target::Attach { pid }, false))
    }

    fn new(target: Target, spawned: bool) -> Session {
        let (stop_tx, stop_rx) = mpsc::channel();
        Session {
            target,
            freq: Duration::from_secs(1),
            detach_retry: Duration::from_secs(1),
            sink: Box::new(io::sink()),
            units: Units::detect(),
            state: State::Created,
            control: Arc::new(Control {
                pid: AtomicI32::new(0),
                alive: AtomicBool::new(true),
                spawned,
                stop: stop_tx,
            }),
            stop_rx: Some(stop_rx),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// A control handle usable while [`run`](Self::run) blocks.
    pub fn handle(&self) -> Handle {
        Handle { control: Arc::clone(&self.control) }
    }

    /// Terminates the target's process group. See [`Handle::kill`].
    pub fn kill(&self) -> Result<(), Error> {
        self.control.kill()
    }

    /// Drives the session to completion: header, trace handshake (spawn
    /// mode), sampling loop, footer. Blocks until the target exits
    /// (spawn mode) or the stop handle fires (attach mode).
    ///
    /// Consuming `self` makes re-running a stopped session a compile
    /// error rather than a runtime state check.
    pub fn run(mut self) -> Result<(), Error> {
        match self.target.clone() {
            Target::Spawn { program, args } => self.run_spawned(program, args),
            Target::Attach { pid } => self.run_attached(pid),
        }
    }

    fn run_spawned(&mut self, program: String, args: Vec<String>) -> Result<(), Error> {
        let tracer = TraceExecutor::new().map_err(Error::Start)?;

        // The executor thread becomes the tracer; the stop-wait and the
        // detach below must go through it as well.
        let (prog, argv) = (program.clone(), args.clone());
        let mut child = tracer
            .submit(move || trace::spawn_traced(&prog, &argv))
            .and_then(|r| r)
            .map_err(Error::Start)?;

        let pid = child.id() as i32;
        self.control.pid.store(pid, Ordering::SeqCst);
        self.state = State::Running;
        let started = Instant::now();

        let mut coll = collector::open(pid, self.units)?;

        let mut display = program;
        for arg in &args {
            display.push(' ');
            display.push_str(arg);
        }
        logfmt::write_header(&mut self.sink, &display, self.freq, Utc::now())
            .map_err(Error::SinkWrite)?;

        // Whatever happens past the header, the footer still gets
        // written so a partial log stays parseable.
        let outcome = self.trace_and_sample(&tracer, &mut child, &mut coll, pid);
        self.finish(started, outcome)
    }

    fn run_attached(&mut self, pid: i32) -> Result<(), Error> {
        self.control.pid.store(pid, Ordering::SeqCst);
        self.state = State::Running;
        let started = Instant::now();

        let mut coll = collector::open(pid, self.units)?;

        logfmt::write_header(&mut self.sink, &cmdline(pid), self.freq, Utc::now())
            .map_err(Error::SinkWrite)?;

        info!(
            "monitoring... (pid={pid}, freq={})",
            logfmt::format_duration(self.freq)
        );

        // There is no child to wait on: sample on this thread until the
        // stop handle fires.
        let stop_rx = self.stop_rx.take().expect("fresh session has a stop receiver");
        sample_loop(&mut coll, &mut self.sink, self.freq, &stop_rx, &self.control);

        self.finish(started, Ok(()))
    }

    fn trace_and_sample(
        &mut self,
        tracer: &TraceExecutor,
        child: &mut Child,
        coll: &mut PlatformCollector,
        pid: i32,
    ) -> Result<(), Error> {
        let target = Pid::from_raw(pid);

        // The child is stopped at its exec. Consume that stop, then
        // detach so it runs untraced from its very first instruction;
        // tracing only exists to order "sampler attached" before
        // "target runs".
        tracer
            .exec(move || trace::wait_initial_stop(target))
            .map_err(Error::TraceHandshake)?;

        if let Err(e) = tracer.exec(move || trace::detach(target)) {
            warn!("could not detach from pid={pid}: {e}; retrying");
            thread::sleep(self.detach_retry);
            tracer
                .exec(move || trace::detach(target))
                .map_err(Error::TraceHandshake)?;
        }

        info!(
            "monitoring... (pid={pid}, freq={})",
            logfmt::format_duration(self.freq)
        );

        let stop_rx = self.stop_rx.take().expect("fresh session has a stop receiver");
        let sampler_control = Arc::clone(&self.control);
        let control = Arc::clone(&self.control);
        let freq = self.freq;
        let sink = &mut self.sink;

        thread::scope(|s| {
            s.spawn(move || sample_loop(coll, sink, freq, &stop_rx, &sampler_control));

            match child.wait() {
                Ok(status) => debug!("target exited: {status}"),
                Err(e) => warn!("could not wait for pid={pid}: {e}"),
            }
            control.alive.store(false, Ordering::SeqCst);
            control.request_stop();
            // Leaving the scope joins the sampler, so the footer that
            // follows can never interleave with a sample line.
        });
        Ok(())
    }

    /// Writes the footer and flushes, preserving the first error of the
    /// run over any footer error.
    fn finish(&mut self, started: Instant, outcome: Result<(), Error>) -> Result<(), Error> {
        self.control.alive.store(false, Ordering::SeqCst);
        let footer = logfmt::write_footer(&mut self.sink, started.elapsed(), Utc::now())
            .and_then(|_| self.sink.flush())
            .map_err(Error::SinkWrite);
        self.state = State::Stopped;
        outcome.and(footer)
    }
}

/// The shared sampling loop: one immediate sample, then one per timer
/// fire, racing the stop signal. Whichever event is observed first wins;
/// an in-flight sample always completes before the loop exits. A slow
/// collection delays the next tick instead of overlapping it.
fn sample_loop<C, W>(
    coll: &mut C,
    sink: &mut W,
    freq: Duration,
    stop: &mpsc::Receiver<()>,
    control: &Control,
) where
    C: Collect,
    W: Write + ?Sized,
{
    sample_once(coll, sink, control);
    loop {
        match stop.recv_timeout(freq) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => sample_once(coll, sink, control),
        }
    }
}

/// One tick. Failures here are logged and skipped; a single missed
/// sample must not end an otherwise healthy run.
fn sample_once<C, W>(coll: &mut C, sink: &mut W, control: &Control)
where
    C: Collect,
    W: Write + ?Sized,
{
    if !control.target_alive() {
        // Target already stopped; nothing to collect.
        return;
    }
    match coll.collect() {
        Ok(snapshot) => {
            if let Err(e) = logfmt::write_sample(sink, &snapshot) {
                warn!("could not write sample: {e}");
            }
        }
        Err(e) => warn!("error collecting: {e}"),
    }
}

/// Best-effort command line of an attached process, for the log header.
#[cfg(target_os = "linux")]
fn cmdline(pid: i32) -> String {
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(raw) if !raw.is_empty() => raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" "),
        _ => "<N/A>".to_string(),
    }
}

#[cfg(not(target_os = "linux"))]
fn cmdline(_pid: i32) -> String {
    "<N/A>".to_string()
}
