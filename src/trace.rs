//! Serialization of trace-control syscalls onto one OS thread.
//!
//! The kernel ties the tracer role to a thread, not a process: the thread
//! that spawns a traced child is the only one that may wait for its trace
//! stops and detach from it. [`TraceExecutor`] owns a single long-lived
//! worker thread and funnels every trace-sensitive call through it, so no
//! caller needs to care which thread it runs on.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;

use nix::sys::ptrace;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send>;

/// A single-worker executor for trace-control operations.
///
/// Tasks run in submission order, one at a time; the n-th submitted task
/// completes before the n+1-th begins executing.
pub struct TraceExecutor {
    tasks: mpsc::SyncSender<Task>,
}

impl TraceExecutor {
    /// Spawns the worker thread. It lives until the executor is dropped,
    /// which closes the task queue.
    pub fn new() -> io::Result<TraceExecutor> {
        // Rendezvous queue: a submit blocks until the worker takes the
        // task, and each task hands its result back over its own
        // rendezvous channel. Nothing is ever queued, dropped, or
        // delivered to the wrong caller.
        let (tasks, queue) = mpsc::sync_channel::<Task>(0);
        thread::Builder::new()
            .name("trace-executor".into())
            .spawn(move || {
                for task in queue {
                    task();
                }
            })?;
        Ok(TraceExecutor { tasks })
    }

    /// Runs `f` on the worker thread and blocks until its result is back.
    pub fn submit<T, F>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(0);
        self.tasks
            .send(Box::new(move || {
                // A send can only fail if the submitter gave up, in which
                // case there is nobody left to tell.
                let _ = reply.send(f());
            }))
            .map_err(|_| worker_gone())?;
        result.recv().map_err(|_| worker_gone())
    }

    /// Like [`submit`](Self::submit) for fallible tasks, flattening the
    /// transport error and the task's own error into one.
    pub fn exec<F>(&self, f: F) -> io::Result<()>
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.submit(f).and_then(|r| r)
    }
}

fn worker_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "trace executor worker is gone")
}

/// Spawns `program` with stdio inherited, as a new process-group leader,
/// stopping itself in a trace-stop at exec.
///
/// Must run on the executor thread: the spawning thread becomes the
/// tracer, and [`wait_initial_stop`] and [`detach`] only work from it.
pub(crate) fn spawn_traced(program: &str, args: &[String]) -> io::Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0);
    // The trace-stop at exec guarantees the sampler is watching before
    // the target runs its first instruction.
    unsafe {
        cmd.pre_exec(|| ptrace::traceme().map_err(io::Error::from));
    }
    cmd.spawn()
}

/// Consumes the trace-stop the child enters at exec.
pub(crate) fn wait_initial_stop(pid: Pid) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    let options = Some(nix::sys::wait::WaitPidFlag::__WALL);
    #[cfg(not(target_os = "linux"))]
    let options = None;

    let status = waitpid(pid, options).map_err(io::Error::from)?;
    debug!("initial trace stop: {status:?}");
    Ok(())
}

/// Detaches from `pid` so it resumes and runs untraced from here on.
pub(crate) fn detach(pid: Pid) -> io::Result<()> {
    ptrace::detach(pid, None).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn submit_returns_the_task_result() {
        let exec = TraceExecutor::new().unwrap();
        assert_eq!(exec.submit(|| 6 * 7).unwrap(), 42);
        assert_eq!(exec.submit(|| "ok".to_string()).unwrap(), "ok");
    }

    #[test]
    fn tasks_run_on_one_dedicated_thread() {
        let exec = TraceExecutor::new().unwrap();
        let first = exec.submit(|| thread::current().id()).unwrap();
        let second = exec.submit(|| thread::current().id()).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, thread::current().id());
    }

    #[test]
    fn tasks_complete_in_submission_order() {
        let exec = TraceExecutor::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let seen = Arc::clone(&seen);
            exec.submit(move || seen.lock().unwrap().push(i)).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn exec_flattens_task_errors() {
        let exec = TraceExecutor::new().unwrap();
        let err = exec
            .exec(|| Err(io::Error::new(io::ErrorKind::Other, "boom")))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
