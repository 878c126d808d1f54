//! The cooperative process seam.
//!
//! A process is an explicit state machine driven by the scheduler: each
//! resumption names its cause ([`Resume`]) and returns the next effect
//! to perform ([`Step`]). The effect set is exhaustive; there are no
//! hidden suspension points.

use crate::batch::Batch;
use crate::error::SimError;
use crate::fixed::Ticks;
use crate::id::{ProcessId, QueueId};
use crate::log::EventLog;

/// Why a process is being resumed.
#[derive(Debug)]
pub enum Resume {
    /// First resumption after spawn.
    Start,
    /// A requested `Sleep` elapsed.
    Timer,
    /// A requested `Get` completed with this batch.
    Received(Batch),
    /// A requested `Put` completed (the store or a consumer took the
    /// batch).
    Delivered,
    /// Requested `Fork` children have been spawned.
    Forked,
    /// The `Join` barrier released: every forked child has finished.
    ChildrenDone,
}

/// The next effect a process asks the scheduler to perform.
pub enum Step {
    /// Suspend for the given number of ticks, then resume with `Timer`.
    Sleep(Ticks),
    /// Take the next batch from a store; resume with `Received` once
    /// one is available.
    Get(QueueId),
    /// Offer a batch to a store; resume with `Delivered` once it is
    /// accepted (immediately, or after backpressure clears).
    Put(QueueId, Batch),
    /// Spawn child processes sharing this tick. Resume with `Forked`.
    Fork(Vec<Box<dyn Process>>),
    /// Wait until all forked children are done; resume with
    /// `ChildrenDone`.
    Join,
    /// The process is finished and may be reaped.
    Done,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Sleep(t) => write!(f, "Sleep({t})"),
            Step::Get(q) => write!(f, "Get({q:?})"),
            Step::Put(q, b) => write!(f, "Put({q:?}, {:?})", b.id),
            Step::Fork(children) => write!(f, "Fork({} children)", children.len()),
            Step::Join => write!(f, "Join"),
            Step::Done => write!(f, "Done"),
        }
    }
}

/// Per-resumption context handed to the process.
pub struct ProcessCtx<'a> {
    /// The resumed process's own id.
    pub pid: ProcessId,
    /// Current virtual time.
    pub now: Ticks,
    /// The run's event log.
    pub log: &'a mut EventLog,
}

/// A cooperative simulation process.
pub trait Process {
    fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError>;
}
