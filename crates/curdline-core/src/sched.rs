//! Virtual clock and event scheduler.
//!
//! Time only moves when the scheduler pops the earliest pending
//! continuation: the clock jumps to its due tick and exactly that
//! process is resumed. Ties on the due tick break by submission order
//! (a global sequence counter), so a fixed seed replays identically.

use std::collections::BinaryHeap;

use slotmap::SlotMap;

use crate::batch::Batch;
use crate::error::SimError;
use crate::fixed::Ticks;
use crate::id::{ProcessId, QueueId};
use crate::log::EventLog;
use crate::process::{Process, ProcessCtx, Resume, Step};
use crate::queue::{GetOutcome, PutOutcome, Store, Wakeup};

/// Life cycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Constructed, not yet driven.
    Idle,
    /// Inside `run_until`.
    Running,
    /// The event heap emptied before the limit.
    Drained,
    /// The limit arrived with work still pending; those continuations
    /// were abandoned without further log commits.
    HaltedAtLimit,
}

// ---------------------------------------------------------------------------
// Heap entries
// ---------------------------------------------------------------------------

struct Scheduled {
    due: Ticks,
    /// Global submission counter; the FIFO tie-break at equal due times.
    seq: u64,
    pid: ProcessId,
    cause: Resume,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the std max-heap pops the earliest (due, seq).
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Slot {
    process: Box<dyn Process>,
    /// Whether a continuation for this process sits in the heap. Each
    /// process has at most one outstanding continuation.
    pending: bool,
    parent: Option<ProcessId>,
    live_children: u32,
    /// Parent reached its `Join` barrier and waits for children.
    joining: bool,
}

/// The per-run scheduler. Owns every process and store; single
/// threaded and cooperative, so no step observes another step's
/// half-applied state.
pub struct Scheduler {
    now: Ticks,
    next_seq: u64,
    heap: BinaryHeap<Scheduled>,
    processes: SlotMap<ProcessId, Slot>,
    queues: SlotMap<QueueId, Store>,
    state: RunState,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            heap: BinaryHeap::new(),
            processes: SlotMap::with_key(),
            queues: SlotMap::with_key(),
            state: RunState::Idle,
        }
    }

    pub fn now(&self) -> Ticks {
        self.now
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Create a bounded store. `None` capacity means unbounded.
    pub fn add_queue(&mut self, capacity: Option<usize>) -> QueueId {
        self.queues.insert_with_key(|k| Store::new(k, capacity))
    }

    pub fn queue(&self, id: QueueId) -> Option<&Store> {
        self.queues.get(id)
    }

    /// Post-run collection: pop the next batch from a store without
    /// waking anyone.
    pub fn take_from_queue(&mut self, id: QueueId) -> Option<Batch> {
        self.queues.get_mut(id).and_then(Store::drain_one)
    }

    /// Pre-run seeding of a store. Over-capacity seeding is a wiring
    /// defect and fails fast.
    pub fn seed_queue(&mut self, id: QueueId, batch: Batch) -> Result<(), SimError> {
        let now = self.now;
        match self.queues.get_mut(id) {
            Some(store) => store.seed(batch, now),
            None => Err(SimError::UnknownQueue { queue: id, at: now }),
        }
    }

    /// Register a top-level process and schedule its `Start` at the
    /// current tick.
    pub fn spawn(&mut self, process: Box<dyn Process>) -> Result<ProcessId, SimError> {
        let pid = self.insert_slot(process, None);
        self.schedule(pid, self.now, Resume::Start)?;
        Ok(pid)
    }

    fn insert_slot(&mut self, process: Box<dyn Process>, parent: Option<ProcessId>) -> ProcessId {
        self.processes.insert(Slot {
            process,
            pending: false,
            parent,
            live_children: 0,
            joining: false,
        })
    }

    /// Queue a continuation. Past-due times, double scheduling, and
    /// dead processes are all programmer errors and fail fast.
    fn schedule(&mut self, pid: ProcessId, due: Ticks, cause: Resume) -> Result<(), SimError> {
        if due < self.now {
            return Err(SimError::SchedulingDefect {
                process: pid,
                at: self.now,
                reason: format!("due tick {due} is in the past"),
            });
        }
        let slot = self
            .processes
            .get_mut(pid)
            .ok_or_else(|| SimError::SchedulingDefect {
                process: pid,
                at: self.now,
                reason: "resumption of a dead process".to_string(),
            })?;
        if slot.pending {
            return Err(SimError::SchedulingDefect {
                process: pid,
                at: self.now,
                reason: "process already has an outstanding continuation".to_string(),
            });
        }
        slot.pending = true;
        self.heap.push(Scheduled {
            due,
            seq: self.next_seq,
            pid,
            cause,
        });
        self.next_seq += 1;
        Ok(())
    }

    /// Pop and run the earliest continuation. Returns false when the
    /// heap is empty.
    pub fn advance(&mut self, log: &mut EventLog) -> Result<bool, SimError> {
        let Some(ev) = self.heap.pop() else {
            return Ok(false);
        };
        debug_assert!(ev.due >= self.now);
        self.now = ev.due;

        let slot = self
            .processes
            .get_mut(ev.pid)
            .ok_or_else(|| SimError::SchedulingDefect {
                process: ev.pid,
                at: ev.due,
                reason: "continuation for a reaped process".to_string(),
            })?;
        slot.pending = false;

        let mut ctx = ProcessCtx {
            pid: ev.pid,
            now: self.now,
            log,
        };
        let step = slot.process.resume(&mut ctx, ev.cause)?;
        self.apply_step(ev.pid, step)?;
        Ok(true)
    }

    fn apply_step(&mut self, pid: ProcessId, step: Step) -> Result<(), SimError> {
        match step {
            Step::Sleep(ticks) => {
                self.schedule(pid, self.now + ticks, Resume::Timer)?;
            }
            Step::Get(qid) => {
                let store = self.queues.get_mut(qid).ok_or(SimError::UnknownQueue {
                    queue: qid,
                    at: self.now,
                })?;
                let (outcome, wake) = store.get(pid);
                if let GetOutcome::Received(batch) = outcome {
                    self.schedule(pid, self.now, Resume::Received(batch))?;
                }
                self.apply_wakeup(wake)?;
            }
            Step::Put(qid, batch) => {
                let store = self.queues.get_mut(qid).ok_or(SimError::UnknownQueue {
                    queue: qid,
                    at: self.now,
                })?;
                let (outcome, wake) = store.put(pid, batch);
                if outcome == PutOutcome::Delivered {
                    self.schedule(pid, self.now, Resume::Delivered)?;
                }
                self.apply_wakeup(wake)?;
            }
            Step::Fork(children) => {
                let count = children.len() as u32;
                // Children's Start entries precede the parent's Forked
                // resumption, so they run first within the tick.
                for child in children {
                    let cid = self.insert_slot(child, Some(pid));
                    self.schedule(cid, self.now, Resume::Start)?;
                }
                if let Some(slot) = self.processes.get_mut(pid) {
                    slot.live_children += count;
                }
                self.schedule(pid, self.now, Resume::Forked)?;
            }
            Step::Join => {
                let slot = self
                    .processes
                    .get_mut(pid)
                    .ok_or_else(|| SimError::SchedulingDefect {
                        process: pid,
                        at: self.now,
                        reason: "join from a reaped process".to_string(),
                    })?;
                if slot.live_children == 0 {
                    self.schedule(pid, self.now, Resume::ChildrenDone)?;
                } else {
                    slot.joining = true;
                }
            }
            Step::Done => {
                let slot = self.processes.remove(pid).ok_or_else(|| {
                    SimError::SchedulingDefect {
                        process: pid,
                        at: self.now,
                        reason: "done from a reaped process".to_string(),
                    }
                })?;
                if let Some(parent) = slot.parent
                    && let Some(pslot) = self.processes.get_mut(parent)
                {
                    pslot.live_children -= 1;
                    if pslot.live_children == 0 && pslot.joining {
                        pslot.joining = false;
                        self.schedule(parent, self.now, Resume::ChildrenDone)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_wakeup(&mut self, wake: Option<Wakeup>) -> Result<(), SimError> {
        match wake {
            Some(Wakeup::ProducerDelivered(pid)) => self.schedule(pid, self.now, Resume::Delivered),
            Some(Wakeup::ConsumerReceived(pid, batch)) => {
                self.schedule(pid, self.now, Resume::Received(batch))
            }
            None => Ok(()),
        }
    }

    /// Drive the run until the heap empties or the next due tick
    /// reaches `limit`. Continuations due exactly at the limit are not
    /// run.
    pub fn run_until(&mut self, limit: Ticks, log: &mut EventLog) -> Result<RunState, SimError> {
        self.state = RunState::Running;
        loop {
            match self.heap.peek() {
                None => {
                    self.state = RunState::Drained;
                    return Ok(self.state);
                }
                Some(next) if next.due >= limit => {
                    self.now = limit;
                    self.state = RunState::HaltedAtLimit;
                    return Ok(self.state);
                }
                Some(_) => {
                    self.advance(log)?;
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;
    use crate::id::{BatchId, StageId};
    use crate::log::{FieldSet, LogEvent};

    const STAGE: StageId = StageId(0);

    fn test_log() -> EventLog {
        let mut log = EventLog::new();
        log.register(STAGE, "test");
        log
    }

    fn mark(ctx: &mut ProcessCtx<'_>, label: &str) {
        ctx.log
            .log(LogEvent {
                stage: STAGE,
                time: ctx.now,
                fields: FieldSet {
                    phase: Some(label.to_string()),
                    ..FieldSet::default()
                },
            })
            .unwrap();
    }

    fn phases(log: &EventLog) -> Vec<(Ticks, String)> {
        log.records()
            .iter()
            .map(|r| (r.time, r.fields.phase.clone().unwrap()))
            .collect()
    }

    /// Logs its label on start, sleeps `naps` times, logs again, done.
    struct Sleeper {
        label: String,
        naps: u32,
        nap_len: Ticks,
    }

    impl Process for Sleeper {
        fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
            match cause {
                Resume::Start => {
                    mark(ctx, &format!("{}-start", self.label));
                    Ok(Step::Sleep(self.nap_len))
                }
                Resume::Timer => {
                    self.naps -= 1;
                    if self.naps == 0 {
                        mark(ctx, &format!("{}-end", self.label));
                        Ok(Step::Done)
                    } else {
                        Ok(Step::Sleep(self.nap_len))
                    }
                }
                other => panic!("unexpected resume: {other:?}"),
            }
        }
    }

    // ------------------------------------------------------------------
    // 1. Clock and ordering
    // ------------------------------------------------------------------

    #[test]
    fn clock_jumps_to_due_ticks() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        sched
            .spawn(Box::new(Sleeper {
                label: "a".into(),
                naps: 1,
                nap_len: 10,
            }))
            .unwrap();
        let state = sched.run_until(1000, &mut log).unwrap();
        assert_eq!(state, RunState::Drained);
        assert_eq!(phases(&log), vec![(0, "a-start".into()), (10, "a-end".into())]);
    }

    #[test]
    fn same_tick_resumptions_run_in_submission_order() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        for label in ["first", "second", "third"] {
            sched
                .spawn(Box::new(Sleeper {
                    label: label.into(),
                    naps: 1,
                    nap_len: 5,
                }))
                .unwrap();
        }
        sched.run_until(1000, &mut log).unwrap();
        let got = phases(&log);
        assert_eq!(
            got,
            vec![
                (0, "first-start".into()),
                (0, "second-start".into()),
                (0, "third-start".into()),
                (5, "first-end".into()),
                (5, "second-end".into()),
                (5, "third-end".into()),
            ]
        );
    }

    #[test]
    fn time_never_decreases() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        sched
            .spawn(Box::new(Sleeper {
                label: "a".into(),
                naps: 50,
                nap_len: 3,
            }))
            .unwrap();
        let mut last = 0;
        while sched.advance(&mut log).unwrap() {
            assert!(sched.now() >= last);
            last = sched.now();
        }
        assert_eq!(last, 150);
    }

    // ------------------------------------------------------------------
    // 2. run_until limit semantics
    // ------------------------------------------------------------------

    #[test]
    fn run_until_halts_before_limit_tick() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        sched
            .spawn(Box::new(Sleeper {
                label: "a".into(),
                naps: 1,
                nap_len: 10,
            }))
            .unwrap();
        // The end event is due exactly at the limit: it must not run.
        let state = sched.run_until(10, &mut log).unwrap();
        assert_eq!(state, RunState::HaltedAtLimit);
        assert_eq!(sched.now(), 10);
        assert_eq!(phases(&log), vec![(0, "a-start".into())]);
    }

    #[test]
    fn run_state_starts_idle() {
        let sched = Scheduler::new();
        assert_eq!(sched.state(), RunState::Idle);
    }

    #[test]
    fn empty_heap_drains_immediately() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        assert_eq!(sched.run_until(100, &mut log).unwrap(), RunState::Drained);
    }

    // ------------------------------------------------------------------
    // 3. Scheduling defects
    // ------------------------------------------------------------------

    #[test]
    fn past_due_schedule_is_fatal() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        let pid = sched
            .spawn(Box::new(Sleeper {
                label: "a".into(),
                naps: 2,
                nap_len: 10,
            }))
            .unwrap();
        sched.advance(&mut log).unwrap(); // now a sleep to tick 10 is pending
        sched.advance(&mut log).unwrap(); // now == 10
        let err = sched.schedule(pid, 5, Resume::Timer).unwrap_err();
        assert!(matches!(err, SimError::SchedulingDefect { at: 10, .. }));
    }

    #[test]
    fn double_schedule_is_fatal() {
        let mut sched = Scheduler::new();
        let pid = sched
            .spawn(Box::new(Sleeper {
                label: "a".into(),
                naps: 1,
                nap_len: 1,
            }))
            .unwrap();
        // Start is already pending.
        let err = sched.schedule(pid, 0, Resume::Timer).unwrap_err();
        assert!(matches!(err, SimError::SchedulingDefect { .. }));
    }

    // ------------------------------------------------------------------
    // 4. Queue interaction
    // ------------------------------------------------------------------

    fn batch(n: u64) -> Batch {
        Batch::milk(
            BatchId(n),
            f64_to_fixed64(100.0),
            f64_to_fixed64(4.0),
            f64_to_fixed64(6.7),
        )
    }

    #[test]
    fn seeding_an_unknown_store_is_a_wiring_defect() {
        let mut sched = Scheduler::new();
        let err = sched.seed_queue(QueueId::default(), batch(1)).unwrap_err();
        assert!(matches!(err, SimError::UnknownQueue { .. }));
    }

    /// Puts `total` batches, one per tick.
    struct Producer {
        out: QueueId,
        total: u64,
        sent: u64,
    }

    impl Process for Producer {
        fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
            match cause {
                Resume::Start => Ok(Step::Put(self.out, batch(self.sent))),
                Resume::Delivered => {
                    mark(ctx, &format!("delivered-{}", self.sent));
                    self.sent += 1;
                    if self.sent == self.total {
                        Ok(Step::Done)
                    } else {
                        Ok(Step::Sleep(1))
                    }
                }
                Resume::Timer => Ok(Step::Put(self.out, batch(self.sent))),
                other => panic!("unexpected resume: {other:?}"),
            }
        }
    }

    /// Takes one batch every `period` ticks.
    struct Consumer {
        input: QueueId,
        period: Ticks,
        taken: u64,
    }

    impl Process for Consumer {
        fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
            match cause {
                Resume::Start => Ok(Step::Get(self.input)),
                Resume::Received(b) => {
                    mark(ctx, &format!("got-{}", b.id.0));
                    self.taken += 1;
                    Ok(Step::Sleep(self.period))
                }
                Resume::Timer => Ok(Step::Get(self.input)),
                other => panic!("unexpected resume: {other:?}"),
            }
        }
    }

    #[test]
    fn producer_parks_at_capacity_and_resumes_after_get() {
        // Capacity 5, producer 1/tick, consumer 1 per 2 ticks: the
        // producer must suspend when occupancy hits 5 and resume only
        // after the next get frees a slot.
        let mut sched = Scheduler::new();
        let mut log = test_log();
        let q = sched.add_queue(Some(5));
        sched
            .spawn(Box::new(Producer {
                out: q,
                total: 20,
                sent: 0,
            }))
            .unwrap();
        sched
            .spawn(Box::new(Consumer {
                input: q,
                period: 2,
                taken: 0,
            }))
            .unwrap();
        sched.run_until(10_000, &mut log).unwrap();

        // All 20 delivered and consumed.
        let delivered = phases(&log)
            .iter()
            .filter(|(_, p)| p.starts_with("delivered-"))
            .count();
        let got = phases(&log)
            .iter()
            .filter(|(_, p)| p.starts_with("got-"))
            .count();
        assert_eq!(delivered, 20);
        assert_eq!(got, 20);
        assert!(sched.queue(q).unwrap().is_empty());
    }

    #[test]
    fn consumer_blocks_until_put() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        let q = sched.add_queue(Some(5));
        sched
            .spawn(Box::new(Consumer {
                input: q,
                period: 1,
                taken: 0,
            }))
            .unwrap();
        // No producer: consumer parks, heap drains.
        assert_eq!(sched.run_until(100, &mut log).unwrap(), RunState::Drained);
        assert!(phases(&log).is_empty());
    }

    // ------------------------------------------------------------------
    // 5. Fork/join
    // ------------------------------------------------------------------

    /// Forks `n` one-tick children, joins, then logs and finishes.
    struct Forker {
        n: u32,
    }

    struct OneTickChild {
        idx: u32,
    }

    impl Process for OneTickChild {
        fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
            match cause {
                Resume::Start => Ok(Step::Sleep(1)),
                Resume::Timer => {
                    mark(ctx, &format!("child-{}", self.idx));
                    Ok(Step::Done)
                }
                other => panic!("unexpected resume: {other:?}"),
            }
        }
    }

    impl Process for Forker {
        fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
            match cause {
                Resume::Start => {
                    let children: Vec<Box<dyn Process>> = (0..self.n)
                        .map(|idx| Box::new(OneTickChild { idx }) as Box<dyn Process>)
                        .collect();
                    Ok(Step::Fork(children))
                }
                Resume::Forked => Ok(Step::Join),
                Resume::ChildrenDone => {
                    mark(ctx, "parent-after-join");
                    Ok(Step::Done)
                }
                other => panic!("unexpected resume: {other:?}"),
            }
        }
    }

    #[test]
    fn join_waits_for_all_children() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        sched.spawn(Box::new(Forker { n: 4 })).unwrap();
        sched.run_until(1000, &mut log).unwrap();

        let got = phases(&log);
        assert_eq!(got.len(), 5);
        // Children log in fork order, parent strictly after.
        for (i, (_, p)) in got.iter().take(4).enumerate() {
            assert_eq!(p, &format!("child-{i}"));
        }
        assert_eq!(got[4].1, "parent-after-join");
    }

    #[test]
    fn join_with_no_children_releases_immediately() {
        let mut sched = Scheduler::new();
        let mut log = test_log();
        sched.spawn(Box::new(Forker { n: 0 })).unwrap();
        assert_eq!(sched.run_until(1000, &mut log).unwrap(), RunState::Drained);
        assert_eq!(phases(&log), vec![(0, "parent-after-join".into())]);
    }
}
