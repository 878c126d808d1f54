//! Pipeline wiring.
//!
//! A [`Pipeline`] owns one scheduler and one event log for the run,
//! chains stage processes through bounded stores, and hands back the
//! normalized record stream plus per-stage reports when the run ends.
//! Ordering is linear: stage i's output store is stage i+1's input.

use crate::batch::Batch;
use crate::error::SimError;
use crate::fixed::{Fixed64, Ticks};
use crate::id::{QueueId, StageId};
use crate::log::EventLog;
use crate::rng::SimRng;
use crate::sched::{RunState, Scheduler};
use crate::anomaly::AnomalyInjector;
use crate::stage::{StageDef, StageHandle, StageProcess, StageReport};

struct StageSpec {
    def: StageDef,
    input_capacity: Option<usize>,
    anomaly_probability: Fixed64,
}

/// Builder for a linear pipeline. Stage order is declaration order.
pub struct PipelineBuilder {
    master: SimRng,
    specs: Vec<StageSpec>,
    collect_capacity: Option<Option<usize>>,
}

impl PipelineBuilder {
    /// All randomness in the run derives from this seed: each stage
    /// gets independent noise and anomaly streams split from it, so a
    /// fixed seed reproduces the record stream exactly.
    pub fn new(seed: u64) -> Self {
        Self {
            master: SimRng::new(seed),
            specs: Vec::new(),
            collect_capacity: None,
        }
    }

    /// Append a stage. `input_capacity` bounds the store feeding it.
    pub fn stage(
        mut self,
        def: StageDef,
        input_capacity: Option<usize>,
        anomaly_probability: Fixed64,
    ) -> Self {
        self.specs.push(StageSpec {
            def,
            input_capacity,
            anomaly_probability,
        });
        self
    }

    /// Give the last stage an output store instead of making it
    /// terminal, so finished goods can be collected after the run.
    pub fn collect_output(mut self, capacity: Option<usize>) -> Self {
        self.collect_capacity = Some(capacity);
        self
    }

    pub fn build(mut self) -> Result<Pipeline, SimError> {
        let mut sched = Scheduler::new();
        let mut log = EventLog::new();
        let mut handles = Vec::with_capacity(self.specs.len());
        let mut stage_order = Vec::with_capacity(self.specs.len());

        let inputs: Vec<QueueId> = self
            .specs
            .iter()
            .map(|s| sched.add_queue(s.input_capacity))
            .collect();
        let final_store = self.collect_capacity.map(|cap| sched.add_queue(cap));

        let count = self.specs.len();
        for (i, spec) in self.specs.drain(..).enumerate() {
            let output = if i + 1 < count {
                Some(inputs[i + 1])
            } else {
                final_store
            };
            log.register(spec.def.stage, spec.def.name);
            stage_order.push(spec.def.stage);

            let noise = self.master.split(i as u64 * 2);
            let injector_rng = self.master.split(i as u64 * 2 + 1);
            let injector = AnomalyInjector::new(injector_rng, spec.anomaly_probability);
            let (process, handle) = StageProcess::new(spec.def, inputs[i], output, noise, injector);
            sched.spawn(Box::new(process))?;
            handles.push(handle);
        }

        Ok(Pipeline {
            sched,
            log,
            handles,
            stage_order,
            intake: inputs.first().copied(),
            final_store,
        })
    }
}

/// A wired production line, ready to seed and run.
pub struct Pipeline {
    sched: Scheduler,
    log: EventLog,
    handles: Vec<StageHandle>,
    stage_order: Vec<StageId>,
    intake: Option<QueueId>,
    final_store: Option<QueueId>,
}

impl Pipeline {
    pub fn builder(seed: u64) -> PipelineBuilder {
        PipelineBuilder::new(seed)
    }

    /// Seed a raw batch into the first stage's input store.
    pub fn seed(&mut self, batch: Batch) -> Result<(), SimError> {
        let intake = self.intake.ok_or(SimError::UnknownQueue {
            queue: QueueId::default(),
            at: self.sched.now(),
        })?;
        self.sched.seed_queue(intake, batch)
    }

    pub fn run_until(&mut self, limit: Ticks) -> Result<RunState, SimError> {
        let log = &mut self.log;
        self.sched.run_until(limit, log)
    }

    pub fn now(&self) -> Ticks {
        self.sched.now()
    }

    pub fn state(&self) -> RunState {
        self.sched.state()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// The declared stage order, as used for finalization.
    pub fn stage_order(&self) -> &[StageId] {
        &self.stage_order
    }

    /// Re-bucket the log by stage order. See [`EventLog::finalize`].
    pub fn finalize_log(&mut self) {
        let order = self.stage_order.clone();
        self.log.finalize(&order);
    }

    /// End-of-run summaries, in stage order.
    pub fn reports(&self) -> Vec<StageReport> {
        self.handles.iter().map(StageHandle::report).collect()
    }

    /// Pop the next finished batch, if the line was built with
    /// `collect_output`.
    pub fn take_finished(&mut self) -> Option<Batch> {
        let store = self.final_store?;
        self.sched.take_from_queue(store)
    }
}
