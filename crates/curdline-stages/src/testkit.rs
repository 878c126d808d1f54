//! Shared helpers for the per-stage test modules: run a single machine
//! on its own scheduler and collect its records, report, and output.

use curdline_core::anomaly::AnomalyInjector;
use curdline_core::batch::Batch;
use curdline_core::fixed::{Fixed64, f64_to_fixed64};
use curdline_core::log::{EventLog, NormalizedRecord};
use curdline_core::rng::SimRng;
use curdline_core::sched::{RunState, Scheduler};
use curdline_core::stage::{StageDef, StageProcess, StageReport};

pub(crate) fn fx(v: f64) -> Fixed64 {
    f64_to_fixed64(v)
}

pub(crate) fn run_one(
    def: StageDef,
    batch: Batch,
    seed: u64,
) -> (Vec<NormalizedRecord>, StageReport, Option<Batch>) {
    run_one_with_anomalies(def, batch, seed, Fixed64::ZERO)
}

pub(crate) fn run_one_with_anomalies(
    def: StageDef,
    batch: Batch,
    seed: u64,
    probability: Fixed64,
) -> (Vec<NormalizedRecord>, StageReport, Option<Batch>) {
    let mut sched = Scheduler::new();
    let mut log = EventLog::new();
    log.register(def.stage, def.name);

    let input = sched.add_queue(Some(4));
    let output = sched.add_queue(None);
    let mut rng = SimRng::new(seed);
    let injector = AnomalyInjector::new(rng.split(1), probability);
    let (process, handle) = StageProcess::new(def, input, Some(output), rng, injector);

    sched.seed_queue(input, batch).unwrap();
    sched.spawn(Box::new(process)).unwrap();
    assert_eq!(
        sched.run_until(1_000_000, &mut log).unwrap(),
        RunState::Drained
    );

    let out = sched.take_from_queue(output);
    (log.records().to_vec(), handle.report(), out)
}
