//! pmon - single-process resource monitoring.
//!
//! Samples CPU, memory, thread, and I/O counters of one target process
//! at a fixed interval and appends them to a plain-text log for offline
//! analysis. The target is either spawned under trace control, which
//! guarantees the sampler is attached before the target executes its
//! first instruction, or an already-running process attached to by pid.
//!
//! Modules:
//! - `session` - the spawn/attach/run/kill state machine and the
//!   sampling loop
//! - `trace` - the single-thread executor for thread-affine trace
//!   syscalls
//! - `collector` - platform counter sources (procfs, task-info)
//! - `logfmt` - the line-oriented log format writer
//! - `report` - the offline log parser used by `pmon-plot` and friends

pub mod collector;
pub mod error;
pub mod logfmt;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod trace;

pub use error::Error;
pub use report::Report;
pub use session::{Handle, Session, Target};
pub use snapshot::Snapshot;
