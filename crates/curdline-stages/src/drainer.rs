//! The whey drainer.
//!
//! The cut curd rests on the draining table: free whey runs off on a
//! fixed schedule with a little valve noise, the bed cools from scald
//! toward handling temperature, and the moisture percentage falls until
//! it reaches the target. A trickle of fines goes out with the whey.
//! The bed is weighed off at the end, giving the batch its mass.

use curdline_core::fixed::{EPSILON, Fixed64, f64_to_fixed64};
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{PendingDelta, Phase, StageDef};

use crate::params::{BoundaryPolicy, DrainerParams};

// aux register layout
const AX_WHEY_PER_TICK: usize = 0;
const AX_MOISTURE_PER_TICK: usize = 1;
const AX_TEMP_PER_TICK: usize = 2;
const AUX_LEN: usize = 3;

pub fn stage_def(stage: StageId, params: &DrainerParams) -> StageDef {
    let p = params.clone();
    let done = params.clone();
    let recv = params.clone();
    let weigh = params.clone();

    StageDef {
        stage,
        name: "whey_drainer",
        phases: vec![Phase::timed(
            "draining",
            Box::new(move |vars, rng, _| {
                let jitter = rng.uniform(f64_to_fixed64(0.95), f64_to_fixed64(1.05));
                let drained = (vars.aux[AX_WHEY_PER_TICK] * jitter).min(vars.whey_l);
                let fines = vars.curd_l * rng.uniform(p.curd_loss_low, p.curd_loss_high);
                let fall = vars.aux[AX_MOISTURE_PER_TICK] * jitter;
                let floor = vars.moisture_pct - p.target_moisture;
                PendingDelta {
                    whey_l: -drained,
                    curd_l: -fines,
                    moisture_pct: -fall.min(floor).max(Fixed64::ZERO),
                    temperature_c: vars.aux[AX_TEMP_PER_TICK],
                    ..PendingDelta::none()
                }
            }),
            Box::new(move |vars, _| match done.boundary {
                BoundaryPolicy::Exclusive => {
                    vars.moisture_pct <= done.target_moisture + done.moisture_slack
                }
                BoundaryPolicy::Inclusive => {
                    vars.moisture_pct <= done.target_moisture + EPSILON
                }
            }),
        )],
        on_receive: Box::new(move |vars, batch| {
            vars.whey_l = batch.whey_l;
            vars.curd_l = batch.curd_l;
            vars.ph = batch.ph;
            vars.units = batch.units;
            vars.moisture_pct = recv.initial_moisture;
            vars.temperature_c = recv.start_temp;
            let ticks = Fixed64::from_num(recv.drain_ticks as i64);
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_WHEY_PER_TICK] = batch.whey_l / ticks;
            vars.aux[AX_MOISTURE_PER_TICK] =
                (recv.initial_moisture - recv.target_moisture) / ticks;
            vars.aux[AX_TEMP_PER_TICK] = (recv.end_temp - recv.start_temp) / ticks;
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            whey_l: Some(vars.whey_l),
            curd_l: Some(vars.curd_l),
            moisture_pct: Some(vars.moisture_pct),
            temperature_c: Some(vars.temperature_c),
            ..FieldSet::default()
        }),
        finish: Box::new(move |vars, mut batch| {
            batch.whey_l = vars.whey_l;
            batch.curd_l = vars.curd_l;
            batch.moisture_pct = vars.moisture_pct;
            batch.temperature_c = vars.temperature_c;
            batch.mass_kg = vars.curd_l * weigh.curd_density;
            vars.mass_kg = batch.mass_kg;
            batch
        }),
    }
}
