//! The generic stage process.
//!
//! Every machine on the line is one [`StageProcess`] driving a
//! [`StageDef`]: consume a batch from the input store, walk an ordered
//! phase sequence, emit downstream (or loop straight back to the next
//! `Get` when terminal). Phase bodies are either timed loops with the
//! compute-then-commit pending-delta discipline, or per-unit forks
//! where each discrete sub-unit (a curd particle) gets a one-tick child
//! process accumulating into the parent's shared variables.

use std::cell::RefCell;
use std::rc::Rc;

use crate::anomaly::{AnomalyInjector, AnomalyRecord, Checkpoint};
use crate::batch::Batch;
use crate::error::SimError;
use crate::fixed::{Fixed64, Ticks};
use crate::id::{BatchId, QueueId, StageId};
use crate::log::{EventLog, FieldSet, LogEvent};
use crate::process::{Process, ProcessCtx, Resume, Step};
use crate::rng::SimRng;

// ---------------------------------------------------------------------------
// Variables and deltas
// ---------------------------------------------------------------------------

/// Sticky consequences of injected anomalies. Set when an anomaly
/// fires and held until the batch completes; later phases read them to
/// modulate rates and yields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectFlags {
    pub small_curds: bool,
    pub weak_curds: bool,
    pub uneven_curds: bool,
    pub rubbery_curds: bool,
    pub high_moisture: bool,
}

/// A stage's mutable physical state while working a batch.
///
/// The named fields cover the common physicals; `aux` holds
/// stage-specific registers (targets, tank levels, wear counters) laid
/// out by the stage's own `on_receive` hook.
#[derive(Debug, Clone, Default)]
pub struct StageVars {
    pub batch: Option<BatchId>,
    pub milk_l: Fixed64,
    pub whey_l: Fixed64,
    pub curd_l: Fixed64,
    pub mass_kg: Fixed64,
    pub temperature_c: Fixed64,
    pub ph: Fixed64,
    pub moisture_pct: Fixed64,
    pub salt_kg: Fixed64,
    pub units: u32,
    pub aux: Vec<Fixed64>,
    pub effects: EffectFlags,
    /// Anomalies injected while working the current batch, in order.
    pub anomalies: Vec<AnomalyRecord>,
}

/// One tick's computed change, applied at the start of the next tick.
///
/// Log entries therefore always reflect values before the tick's
/// changes take effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingDelta {
    pub milk_l: Fixed64,
    pub whey_l: Fixed64,
    pub curd_l: Fixed64,
    pub mass_kg: Fixed64,
    pub temperature_c: Fixed64,
    pub ph: Fixed64,
    pub moisture_pct: Fixed64,
    pub salt_kg: Fixed64,
    pub units: i64,
    pub aux: Vec<Fixed64>,
}

impl PendingDelta {
    pub fn none() -> Self {
        Self::default()
    }

    fn apply(&self, vars: &mut StageVars) {
        vars.milk_l += self.milk_l;
        vars.whey_l += self.whey_l;
        vars.curd_l += self.curd_l;
        vars.mass_kg += self.mass_kg;
        vars.temperature_c += self.temperature_c;
        vars.ph += self.ph;
        vars.moisture_pct += self.moisture_pct;
        vars.salt_kg += self.salt_kg;
        if self.units != 0 {
            let next = vars.units as i64 + self.units;
            vars.units = next.max(0) as u32;
        }
        for (i, d) in self.aux.iter().enumerate() {
            if let Some(slot) = vars.aux.get_mut(i) {
                *slot += *d;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Phase and stage definitions
// ---------------------------------------------------------------------------

/// Computes the next tick's delta from committed state.
pub type UpdateFn = Box<dyn FnMut(&StageVars, &mut SimRng, Ticks) -> PendingDelta>;
/// Convergence predicate over committed state and ticks-in-phase.
pub type DoneFn = Box<dyn Fn(&StageVars, Ticks) -> bool>;
/// Phase-entry hook: draw targets, reset registers.
pub type EnterFn = Box<dyn FnMut(&mut StageVars, &mut SimRng)>;
/// One child's single-tick contribution; returns the fields it logs.
pub type UnitFn = dyn Fn(&mut StageVars, &mut SimRng, u32) -> FieldSet;

pub enum PhaseBody {
    /// Per tick: commit the previous delta, test `done` (and the
    /// phase's tick bound), compute the next delta, log the pre-delta
    /// observation, sleep one tick.
    Timed { update: UpdateFn, done: DoneFn },
    /// Fork one child per sub-unit; children share the parent's
    /// variables and are joined before the parent moves on.
    PerUnit {
        count: Box<dyn Fn(&StageVars) -> u32>,
        unit: Rc<UnitFn>,
    },
}

pub struct Phase {
    pub name: &'static str,
    /// Consulted once when the phase starts, in phase order.
    pub checkpoint: Option<Checkpoint>,
    /// Hard bound on ticks spent in the phase; the loop exits here even
    /// if `done` never holds.
    pub max_ticks: Ticks,
    pub enter: Option<EnterFn>,
    pub body: PhaseBody,
}

impl Phase {
    /// A timed phase with the conventional tick bound.
    pub fn timed(name: &'static str, update: UpdateFn, done: DoneFn) -> Self {
        Self {
            name,
            checkpoint: None,
            max_ticks: DEFAULT_MAX_TICKS,
            enter: None,
            body: PhaseBody::Timed { update, done },
        }
    }

    /// A fixed-duration phase that changes nothing (dosing, mellowing).
    pub fn hold(name: &'static str, ticks: Ticks) -> Self {
        Self::timed(
            name,
            Box::new(|_, _, _| PendingDelta::none()),
            Box::new(move |_, t| t >= ticks),
        )
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_enter(mut self, enter: EnterFn) -> Self {
        self.enter = Some(enter);
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: Ticks) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

/// Runaway guard for timed phases, matching the plant-floor rule that
/// no single operation runs unattended past this many intervals.
pub const DEFAULT_MAX_TICKS: Ticks = 1000;

/// A complete machine definition: identity, phase sequence, and hooks.
pub struct StageDef {
    pub stage: StageId,
    pub name: &'static str,
    pub phases: Vec<Phase>,
    /// Initialize working variables from the received batch.
    pub on_receive: Box<dyn FnMut(&mut StageVars, &Batch)>,
    /// Fold a fired anomaly into the variables (effect flags, shifted
    /// targets).
    pub apply_anomaly: Box<dyn FnMut(&mut StageVars, &AnomalyRecord)>,
    /// Build the tick's observable fields from committed state. The
    /// process fills `phase`, `batch_id`, and `anomaly` if left unset.
    pub observe: Box<dyn Fn(&StageVars) -> FieldSet>,
    /// Build the outgoing batch from the final variables and the
    /// consumed input batch.
    pub finish: Box<dyn FnMut(&mut StageVars, Batch) -> Batch>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Counters shared between a running stage and its handle.
#[derive(Debug, Default)]
pub struct StageStats {
    pub batches_done: u64,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Pipeline-side view of a stage, live during and after the run.
#[derive(Clone)]
pub struct StageHandle {
    pub stage: StageId,
    pub name: &'static str,
    vars: Rc<RefCell<StageVars>>,
    stats: Rc<RefCell<StageStats>>,
}

/// End-of-run summary for one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageId,
    pub name: &'static str,
    pub batches_done: u64,
    pub anomalies: Vec<AnomalyRecord>,
    pub final_vars: StageVars,
}

impl StageHandle {
    pub fn report(&self) -> StageReport {
        let stats = self.stats.borrow();
        StageReport {
            stage: self.stage,
            name: self.name,
            batches_done: stats.batches_done,
            anomalies: stats.anomalies.clone(),
            final_vars: self.vars.borrow().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// The process
// ---------------------------------------------------------------------------

enum Mode {
    AwaitBatch,
    Run { phase: usize, tick_in_phase: Ticks },
    AwaitFork { phase: usize },
    AwaitJoin { phase: usize },
    Emitting,
}

pub struct StageProcess {
    def: StageDef,
    input: QueueId,
    /// Terminal stages have no output store and loop back to `Get`.
    output: Option<QueueId>,
    vars: Rc<RefCell<StageVars>>,
    rng: Rc<RefCell<SimRng>>,
    injector: AnomalyInjector,
    pending: PendingDelta,
    mode: Mode,
    current: Option<Batch>,
    stats: Rc<RefCell<StageStats>>,
}

impl StageProcess {
    pub fn new(
        def: StageDef,
        input: QueueId,
        output: Option<QueueId>,
        rng: SimRng,
        injector: AnomalyInjector,
    ) -> (Self, StageHandle) {
        let vars = Rc::new(RefCell::new(StageVars::default()));
        let stats = Rc::new(RefCell::new(StageStats::default()));
        let handle = StageHandle {
            stage: def.stage,
            name: def.name,
            vars: Rc::clone(&vars),
            stats: Rc::clone(&stats),
        };
        let process = Self {
            def,
            input,
            output,
            vars,
            rng: Rc::new(RefCell::new(rng)),
            injector,
            pending: PendingDelta::none(),
            mode: Mode::AwaitBatch,
            current: None,
            stats,
        };
        (process, handle)
    }

    fn defect(&self, ctx: &ProcessCtx<'_>, reason: &str) -> SimError {
        SimError::SchedulingDefect {
            process: ctx.pid,
            at: ctx.now,
            reason: format!("stage {}: {reason}", self.def.name),
        }
    }

    fn begin_batch(&mut self, batch: Batch) {
        let mut fresh = StageVars {
            batch: Some(batch.id),
            ..StageVars::default()
        };
        (self.def.on_receive)(&mut fresh, &batch);
        *self.vars.borrow_mut() = fresh;
        self.pending = PendingDelta::none();
        self.current = Some(batch);
    }

    fn log_observation(&self, ctx: &mut ProcessCtx<'_>, phase_name: &str) -> Result<(), SimError> {
        let vars = self.vars.borrow();
        let mut fields = (self.def.observe)(&vars);
        if fields.phase.is_none() {
            fields.phase = Some(phase_name.to_string());
        }
        if fields.batch_id.is_none() {
            fields.batch_id = vars.batch.map(|b| b.0);
        }
        if fields.anomaly.is_none() {
            fields.anomaly = Some(!vars.anomalies.is_empty());
        }
        ctx.log.log(LogEvent {
            stage: self.def.stage,
            time: ctx.now,
            fields,
        })
    }

    fn enter_phase(&mut self, ctx: &mut ProcessCtx<'_>, idx: usize) -> Result<Step, SimError> {
        if idx >= self.def.phases.len() {
            return self.finish_batch(ctx);
        }

        // Checkpoint consultation happens exactly once, before anything
        // else in the phase, so injector call order matches phase order.
        if let Some(cp) = self.def.phases[idx].checkpoint
            && let Some(rec) = self.injector.roll(cp)
        {
            let mut vars = self.vars.borrow_mut();
            vars.anomalies.push(rec);
            (self.def.apply_anomaly)(&mut vars, &rec);
        }

        {
            let phase = &mut self.def.phases[idx];
            if let Some(enter) = &mut phase.enter {
                enter(&mut self.vars.borrow_mut(), &mut self.rng.borrow_mut());
            }
        }

        let fork = match &self.def.phases[idx].body {
            PhaseBody::Timed { .. } => None,
            PhaseBody::PerUnit { count, unit } => {
                Some((count(&self.vars.borrow()), Rc::clone(unit)))
            }
        };
        match fork {
            None => {
                self.pending = PendingDelta::none();
                self.mode = Mode::Run {
                    phase: idx,
                    tick_in_phase: 0,
                };
                self.tick(ctx)
            }
            Some((0, _)) => self.enter_phase(ctx, idx + 1),
            Some((n, unit)) => {
                let phase_name = self.def.phases[idx].name;
                let children: Vec<Box<dyn Process>> = (0..n)
                    .map(|i| {
                        Box::new(UnitProcess {
                            stage: self.def.stage,
                            phase_name,
                            idx: i,
                            vars: Rc::clone(&self.vars),
                            rng: Rc::clone(&self.rng),
                            unit: Rc::clone(&unit),
                        }) as Box<dyn Process>
                    })
                    .collect();
                self.mode = Mode::AwaitFork { phase: idx };
                Ok(Step::Fork(children))
            }
        }
    }

    /// One iteration of a timed phase: commit, test, compute, log,
    /// sleep.
    fn tick(&mut self, ctx: &mut ProcessCtx<'_>) -> Result<Step, SimError> {
        let Mode::Run {
            phase: idx,
            tick_in_phase,
        } = self.mode
        else {
            return Err(self.defect(ctx, "timer fired outside a timed phase"));
        };

        {
            let mut vars = self.vars.borrow_mut();
            self.pending.apply(&mut vars);
        }
        self.pending = PendingDelta::none();

        let phase_name = self.def.phases[idx].name;
        let max_ticks = self.def.phases[idx].max_ticks;
        let finished = {
            let vars = self.vars.borrow();
            match &self.def.phases[idx].body {
                PhaseBody::Timed { done, .. } => done(&vars, tick_in_phase),
                PhaseBody::PerUnit { .. } => {
                    drop(vars);
                    return Err(self.defect(ctx, "timer fired in a per-unit phase"));
                }
            }
        };
        if finished || tick_in_phase >= max_ticks {
            return self.enter_phase(ctx, idx + 1);
        }

        {
            let vars = self.vars.borrow();
            let mut rng = self.rng.borrow_mut();
            if let PhaseBody::Timed { update, .. } = &mut self.def.phases[idx].body {
                self.pending = update(&vars, &mut rng, tick_in_phase);
            }
        }

        self.log_observation(ctx, phase_name)?;
        self.mode = Mode::Run {
            phase: idx,
            tick_in_phase: tick_in_phase + 1,
        };
        Ok(Step::Sleep(1))
    }

    fn finish_batch(&mut self, ctx: &mut ProcessCtx<'_>) -> Result<Step, SimError> {
        let consumed = self
            .current
            .take()
            .ok_or_else(|| self.defect(ctx, "finished with no batch in hand"))?;

        let out = {
            let mut vars = self.vars.borrow_mut();
            let mut out = (self.def.finish)(&mut vars, consumed);
            out.anomalies.extend(vars.anomalies.iter().copied());
            out
        };

        {
            let vars = self.vars.borrow();
            let mut stats = self.stats.borrow_mut();
            stats.batches_done += 1;
            stats.anomalies.extend(vars.anomalies.iter().copied());
        }

        match self.output {
            Some(q) => {
                self.mode = Mode::Emitting;
                Ok(Step::Put(q, out))
            }
            None => {
                self.mode = Mode::AwaitBatch;
                Ok(Step::Get(self.input))
            }
        }
    }
}

impl Process for StageProcess {
    fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
        match cause {
            Resume::Start => {
                self.mode = Mode::AwaitBatch;
                Ok(Step::Get(self.input))
            }
            Resume::Received(batch) => {
                if !matches!(self.mode, Mode::AwaitBatch) {
                    return Err(self.defect(ctx, "received a batch while busy"));
                }
                self.begin_batch(batch);
                self.enter_phase(ctx, 0)
            }
            Resume::Timer => self.tick(ctx),
            Resume::Forked => {
                let Mode::AwaitFork { phase } = self.mode else {
                    return Err(self.defect(ctx, "forked outside a per-unit phase"));
                };
                self.mode = Mode::AwaitJoin { phase };
                Ok(Step::Join)
            }
            Resume::ChildrenDone => {
                let Mode::AwaitJoin { phase } = self.mode else {
                    return Err(self.defect(ctx, "join released without a pending join"));
                };
                self.enter_phase(ctx, phase + 1)
            }
            Resume::Delivered => {
                if !matches!(self.mode, Mode::Emitting) {
                    return Err(self.defect(ctx, "delivery confirmed without a pending put"));
                }
                self.mode = Mode::AwaitBatch;
                Ok(Step::Get(self.input))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-unit children
// ---------------------------------------------------------------------------

/// One forked child: sleeps a tick, applies its contribution to the
/// shared variables, logs, finishes.
struct UnitProcess {
    stage: StageId,
    phase_name: &'static str,
    idx: u32,
    vars: Rc<RefCell<StageVars>>,
    rng: Rc<RefCell<SimRng>>,
    unit: Rc<UnitFn>,
}

impl Process for UnitProcess {
    fn resume(&mut self, ctx: &mut ProcessCtx<'_>, cause: Resume) -> Result<Step, SimError> {
        match cause {
            Resume::Start => Ok(Step::Sleep(1)),
            Resume::Timer => {
                let mut fields = {
                    let mut vars = self.vars.borrow_mut();
                    let mut rng = self.rng.borrow_mut();
                    (self.unit)(&mut vars, &mut rng, self.idx)
                };
                let vars = self.vars.borrow();
                if fields.phase.is_none() {
                    fields.phase = Some(self.phase_name.to_string());
                }
                if fields.batch_id.is_none() {
                    fields.batch_id = vars.batch.map(|b| b.0);
                }
                if fields.particle.is_none() {
                    fields.particle = Some(self.idx);
                }
                if fields.anomaly.is_none() {
                    fields.anomaly = Some(!vars.anomalies.is_empty());
                }
                ctx.log.log(LogEvent {
                    stage: self.stage,
                    time: ctx.now,
                    fields,
                })?;
                Ok(Step::Done)
            }
            _ => Err(SimError::SchedulingDefect {
                process: ctx.pid,
                at: ctx.now,
                reason: "unexpected resumption of a per-unit child".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;
    use crate::log::NormalizedRecord;
    use crate::sched::{RunState, Scheduler};

    const STAGE: StageId = StageId(0);

    fn fx(v: f64) -> Fixed64 {
        f64_to_fixed64(v)
    }

    /// A minimal two-phase heater: ramp temperature to aux[0] at 1
    /// degree per tick, then hold for 3 ticks.
    fn heater_def() -> StageDef {
        StageDef {
            stage: STAGE,
            name: "heater",
            phases: vec![
                Phase::timed(
                    "heating",
                    Box::new(|vars, _, _| {
                        let target = vars.aux[0];
                        let step = fx(1.0).min(target - vars.temperature_c);
                        PendingDelta {
                            temperature_c: step,
                            ..PendingDelta::none()
                        }
                    }),
                    Box::new(|vars, _| vars.temperature_c >= vars.aux[0]),
                ),
                Phase::hold("holding", 3),
            ],
            on_receive: Box::new(|vars, batch| {
                vars.milk_l = batch.milk_l;
                vars.temperature_c = batch.temperature_c;
                vars.aux = vec![fx(8.0)]; // target
            }),
            apply_anomaly: Box::new(|vars, _| {
                vars.effects.weak_curds = true;
            }),
            observe: Box::new(|vars| FieldSet {
                temperature_c: Some(vars.temperature_c),
                milk_l: Some(vars.milk_l),
                ..FieldSet::default()
            }),
            finish: Box::new(|vars, mut batch| {
                batch.temperature_c = vars.temperature_c;
                batch
            }),
        }
    }

    fn milk(id: u64, temp: f64) -> Batch {
        Batch::milk(BatchId(id), fx(100.0), fx(temp), fx(6.7))
    }

    fn run_one(def: StageDef, batch: Batch) -> (Vec<NormalizedRecord>, StageReport, Option<Batch>) {
        let mut sched = Scheduler::new();
        let mut log = EventLog::new();
        log.register(STAGE, def.name);
        let input = sched.add_queue(Some(4));
        let output = sched.add_queue(None);
        let (proc_, handle) = StageProcess::new(
            def,
            input,
            Some(output),
            SimRng::new(1),
            AnomalyInjector::disabled(),
        );
        sched.seed_queue(input, batch).unwrap();
        sched.spawn(Box::new(proc_)).unwrap();
        assert_eq!(sched.run_until(100_000, &mut log).unwrap(), RunState::Drained);

        let out = sched.take_from_queue(output);
        (log.records().to_vec(), handle.report(), out)
    }

    #[test]
    fn timed_phase_converges_and_logs_pre_delta_values() {
        let (records, report, out) = run_one(heater_def(), milk(1, 4.0));

        // Heating 4 -> 8 at 1/tick: observations show 4,5,6,7 (pre-delta),
        // then the hold logs 8 three times.
        let temps: Vec<Fixed64> = records
            .iter()
            .filter(|r| r.fields.phase.as_deref() == Some("heating"))
            .map(|r| r.fields.temperature_c.unwrap())
            .collect();
        assert_eq!(temps, vec![fx(4.0), fx(5.0), fx(6.0), fx(7.0)]);

        let holds = records
            .iter()
            .filter(|r| r.fields.phase.as_deref() == Some("holding"))
            .count();
        assert_eq!(holds, 3);

        assert_eq!(report.batches_done, 1);
        assert_eq!(out.unwrap().temperature_c, fx(8.0));
    }

    #[test]
    fn already_converged_phase_completes_without_logging() {
        // Batch arrives at the target temperature: the heating phase
        // exits on its first test and contributes no records.
        let (records, _, _) = run_one(heater_def(), milk(1, 8.0));
        assert!(
            records
                .iter()
                .all(|r| r.fields.phase.as_deref() != Some("heating"))
        );
    }

    #[test]
    fn max_ticks_bounds_a_divergent_phase() {
        let mut def = heater_def();
        // An update that never moves toward the target.
        def.phases[0] = Phase::timed(
            "heating",
            Box::new(|_, _, _| PendingDelta::none()),
            Box::new(|vars, _| vars.temperature_c >= vars.aux[0]),
        )
        .with_max_ticks(10);
        let (records, report, _) = run_one(def, milk(1, 4.0));
        let heating = records
            .iter()
            .filter(|r| r.fields.phase.as_deref() == Some("heating"))
            .count();
        assert_eq!(heating, 10);
        // The batch still completes.
        assert_eq!(report.batches_done, 1);
    }

    #[test]
    fn observations_carry_batch_id_and_anomaly_flag() {
        let (records, _, _) = run_one(heater_def(), milk(7, 4.0));
        for rec in &records {
            assert_eq!(rec.fields.batch_id, Some(7));
            assert_eq!(rec.fields.anomaly, Some(false));
        }
    }

    #[test]
    fn checkpoint_anomaly_sets_sticky_effects() {
        let mut def = heater_def();
        def.phases[0].checkpoint = Some(Checkpoint::Heating);

        let mut sched = Scheduler::new();
        let mut log = EventLog::new();
        log.register(STAGE, "heater");
        let input = sched.add_queue(Some(4));
        let (proc_, handle) = StageProcess::new(
            def,
            input,
            None,
            SimRng::new(1),
            AnomalyInjector::new(SimRng::new(5), fx(1.0)),
        );
        sched.seed_queue(input, milk(1, 4.0)).unwrap();
        sched.spawn(Box::new(proc_)).unwrap();
        sched.run_until(100_000, &mut log).unwrap();

        let report = handle.report();
        assert_eq!(report.anomalies.len(), 1);
        assert!(report.final_vars.effects.weak_curds);
        // Every record after injection flags the anomaly.
        assert!(log.records().iter().all(|r| r.fields.anomaly == Some(true)));
    }

    #[test]
    fn terminal_stage_loops_back_to_get() {
        let mut sched = Scheduler::new();
        let mut log = EventLog::new();
        log.register(STAGE, "heater");
        let input = sched.add_queue(Some(4));
        let (proc_, handle) = StageProcess::new(
            heater_def(),
            input,
            None,
            SimRng::new(1),
            AnomalyInjector::disabled(),
        );
        sched.seed_queue(input, milk(1, 4.0)).unwrap();
        sched.seed_queue(input, milk(2, 4.0)).unwrap();
        sched.spawn(Box::new(proc_)).unwrap();
        assert_eq!(sched.run_until(100_000, &mut log).unwrap(), RunState::Drained);
        assert_eq!(handle.report().batches_done, 2);
    }

    #[test]
    fn zero_volume_batch_passes_straight_through() {
        let empty = Batch::milk(BatchId(1), Fixed64::ZERO, fx(8.0), fx(6.7));
        let (_, report, out) = run_one(heater_def(), empty);
        assert_eq!(report.batches_done, 1);
        assert!(out.unwrap().is_empty());
    }

    // -- per-unit fork ------------------------------------------------------

    /// Splits `units` particles: each child moves 1 litre of curd to
    /// whey in the shared vars.
    fn splitter_def() -> StageDef {
        StageDef {
            stage: STAGE,
            name: "splitter",
            phases: vec![Phase {
                name: "cutting",
                checkpoint: None,
                max_ticks: DEFAULT_MAX_TICKS,
                enter: None,
                body: PhaseBody::PerUnit {
                    count: Box::new(|vars| vars.units),
                    unit: Rc::new(|vars: &mut StageVars, _rng: &mut SimRng, _i| {
                        vars.curd_l -= fx(1.0);
                        vars.whey_l += fx(1.0);
                        FieldSet {
                            curd_l: Some(vars.curd_l),
                            whey_l: Some(vars.whey_l),
                            ..FieldSet::default()
                        }
                    }),
                },
            }],
            on_receive: Box::new(|vars, batch| {
                vars.curd_l = batch.curd_l;
                vars.units = batch.units;
            }),
            apply_anomaly: Box::new(|_, _| {}),
            observe: Box::new(|_| FieldSet::default()),
            finish: Box::new(|vars, mut batch| {
                batch.curd_l = vars.curd_l;
                batch.whey_l = vars.whey_l;
                batch
            }),
        }
    }

    #[test]
    fn per_unit_children_accumulate_into_shared_vars() {
        let mut batch = milk(3, 20.0);
        batch.milk_l = Fixed64::ZERO;
        batch.curd_l = fx(10.0);
        batch.units = 4;

        let (records, report, out) = run_one(splitter_def(), batch);
        let out = out.unwrap();
        assert_eq!(out.curd_l, fx(6.0));
        assert_eq!(out.whey_l, fx(4.0));
        assert_eq!(report.batches_done, 1);

        // One record per particle, indexed in fork order.
        let particles: Vec<u32> = records
            .iter()
            .filter_map(|r| r.fields.particle)
            .collect();
        assert_eq!(particles, vec![0, 1, 2, 3]);
    }

    #[test]
    fn per_unit_with_zero_units_skips_the_fork() {
        let mut batch = milk(3, 20.0);
        batch.units = 0;
        let (records, report, _) = run_one(splitter_def(), batch);
        assert!(records.iter().all(|r| r.fields.particle.is_none()));
        assert_eq!(report.batches_done, 1);
    }
}
