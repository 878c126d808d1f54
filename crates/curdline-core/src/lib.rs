//! Curdline Core -- a deterministic discrete-event simulation substrate
//! for staged production lines.
//!
//! The crate models a plant as cooperative processes exchanging batches
//! through bounded FIFO stores, all driven by one virtual-time
//! scheduler. Nothing runs on wall-clock time and nothing is global:
//! a [`pipeline::Pipeline`] owns its scheduler, stores, and event log,
//! and a fixed seed reproduces a run bit-for-bit.
//!
//! # Tick Discipline
//!
//! Timed stage phases follow a strict per-tick order:
//!
//! 1. **Commit** -- Apply the delta computed on the previous tick.
//! 2. **Test** -- Check the phase's convergence predicate and tick bound.
//! 3. **Compute** -- Derive the next delta from committed state only.
//! 4. **Log** -- Submit the observation; it reflects pre-delta values.
//! 5. **Sleep** -- Suspend for one tick.
//!
//! Deltas are never applied in the tick that computed them, so no
//! observation ever shows half-applied state.
//!
//! # Key Types
//!
//! - [`sched::Scheduler`] -- Virtual clock and event heap with FIFO
//!   tie-break at equal due times.
//! - [`queue::Store`] -- Bounded FIFO store with parked producers and
//!   consumers (backpressure, never overflow).
//! - [`stage::StageProcess`] -- The generic machine life cycle: consume,
//!   transform through phases, emit.
//! - [`anomaly::AnomalyInjector`] -- Seeded, weighted process-fault
//!   injection at named checkpoints.
//! - [`log::EventLog`] -- Carry-forward normalized record stream with a
//!   gap-free global sequence and stage-order finalization.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic
//!   math.

pub mod anomaly;
pub mod batch;
pub mod error;
pub mod fixed;
pub mod id;
pub mod log;
pub mod pipeline;
pub mod process;
pub mod queue;
pub mod rng;
pub mod sched;
pub mod stage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
