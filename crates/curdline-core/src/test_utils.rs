//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::batch::Batch;
use crate::fixed::{Fixed64, Ticks};
use crate::id::{BatchId, StageId};
use crate::log::FieldSet;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stage::{PendingDelta, Phase, StageDef, StageVars};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Batch constructors
// ===========================================================================

/// Raw milk intake at delivery temperature and natural pH.
pub fn milk_batch(id: u64, litres: f64) -> Batch {
    Batch::milk(BatchId(id), fixed(litres), fixed(4.0), fixed(6.7))
}

/// A curd batch with discrete particles, as the cutter sees it.
pub fn curd_batch(id: u64, curd_l: f64, particles: u32) -> Batch {
    let mut b = Batch::milk(BatchId(id), fixed(0.0), fixed(32.0), fixed(6.5));
    b.curd_l = fixed(curd_l);
    b.units = particles;
    b
}

// ===========================================================================
// Stage constructors
// ===========================================================================

/// A stage that linearly moves temperature to `target` at `rate` per
/// tick. The simplest realistic timed stage.
pub fn ramp_stage(stage: StageId, name: &'static str, target: f64, rate: f64) -> StageDef {
    let target = fixed(target);
    let rate = fixed(rate);
    StageDef {
        stage,
        name,
        phases: vec![Phase::timed(
            "ramping",
            Box::new(move |vars, _, _| {
                let remaining = target - vars.temperature_c;
                let step = if remaining >= Fixed64::ZERO {
                    rate.min(remaining)
                } else {
                    (-rate).max(remaining)
                };
                PendingDelta {
                    temperature_c: step,
                    ..PendingDelta::none()
                }
            }),
            Box::new(move |vars: &StageVars, _| vars.temperature_c == target),
        )],
        on_receive: Box::new(|vars, batch| {
            vars.milk_l = batch.milk_l;
            vars.temperature_c = batch.temperature_c;
        }),
        apply_anomaly: Box::new(|_, _| {}),
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

/// A stage that holds each batch for a fixed number of ticks.
pub fn delay_stage(stage: StageId, name: &'static str, ticks: Ticks) -> StageDef {
    StageDef {
        stage,
        name,
        phases: vec![Phase::hold("holding", ticks)],
        on_receive: Box::new(|vars, batch| {
            vars.milk_l = batch.milk_l;
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            milk_l: Some(vars.milk_l),
            ..FieldSet::default()
        }),
        finish: Box::new(|_, batch| batch),
    }
}

// ===========================================================================
// Pipeline builders (for benchmarks, stress tests, and proptests)
// ===========================================================================

/// Build a linear line of `length` ramp stages with bounded stores.
pub fn build_ramp_line(seed: u64, length: u32, capacity: usize) -> Pipeline {
    let mut builder = PipelineBuilder::new(seed);
    for i in 0..length {
        builder = builder.stage(
            ramp_stage(StageId(i), "ramp", 40.0 + i as f64, 1.0),
            Some(capacity),
            Fixed64::ZERO,
        );
    }
    builder
        .collect_output(None)
        .build()
        .unwrap_or_else(|e| panic!("line construction failed: {e}"))
}
