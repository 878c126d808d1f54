//! HTST pasteuriser.
//!
//! Raw milk sits in the start tank and flows through the holding tube
//! one flow-quantum per tick. Only milk leaving inside the temperature
//! band counts as pasteurized; scorched milk is discarded and forces a
//! cooldown; milk outside the band on either side recirculates through
//! the balance tank, and cold milk comes back slightly warmer. The
//! batch passed downstream carries only the pasteurized litres. Each
//! processing record labels its tick with the routing outcome.

use curdline_core::fixed::{EPSILON, Fixed64};
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{PendingDelta, Phase, StageDef};

use crate::params::PasteuriserParams;

// aux register layout
const AX_START_TANK: usize = 0;
const AX_BALANCE_TANK: usize = 1;
const AX_PASTEURIZED: usize = 2;
const AX_BURNT: usize = 3;
const AX_COOLDOWN: usize = 4;
const AX_STATUS: usize = 5;
const AUX_LEN: usize = 6;

// Routing codes held in the status register; the observation maps
// them to per-tick phase labels.
const ST_PASTEURIZING: i64 = 1;
const ST_RECIRCULATING: i64 = 2;
const ST_BURNING: i64 = 3;
const ST_COOLING: i64 = 4;

pub fn stage_def(stage: StageId, params: &PasteuriserParams) -> StageDef {
    let p = params.clone();
    let warmup = p.clone();
    let flow = p.clone();

    StageDef {
        stage,
        name: "pasteuriser",
        phases: vec![
            Phase::timed(
                "startup",
                Box::new(move |vars, _, _| {
                    let remaining = warmup.optimal_temp - vars.temperature_c;
                    let rate = (warmup.optimal_temp - Fixed64::from_num(20))
                        / Fixed64::from_num(warmup.startup_ticks.max(1) as i64);
                    PendingDelta {
                        temperature_c: rate.min(remaining).max(Fixed64::ZERO),
                        ..PendingDelta::none()
                    }
                }),
                {
                    let ticks = p.startup_ticks;
                    Box::new(move |_, t| t >= ticks)
                },
            ),
            Phase::timed(
                "processing",
                Box::new(move |vars, rng, _| {
                    let mut delta = PendingDelta::none();
                    delta.aux = vec![Fixed64::ZERO; AUX_LEN];
                    let mut code = 0i64;

                    if vars.aux[AX_COOLDOWN] > Fixed64::ZERO {
                        delta.temperature_c = -Fixed64::ONE;
                        delta.aux[AX_COOLDOWN] = -Fixed64::ONE;
                        delta.aux[AX_STATUS] =
                            Fixed64::from_num(ST_COOLING) - vars.aux[AX_STATUS];
                        return delta;
                    }

                    // Closed-loop control plus thermal noise.
                    let error = flow.optimal_temp - vars.temperature_c;
                    let noise = rng.uniform(-flow.noise, flow.noise);
                    delta.temperature_c = error / Fixed64::from_num(5) + noise;

                    // The start tank drains first and never refills;
                    // once empty the balance tank feeds the tube.
                    let from_start = vars.aux[AX_START_TANK] > EPSILON;
                    let source = if from_start { AX_START_TANK } else { AX_BALANCE_TANK };
                    let quantum = flow.flow_per_tick.min(vars.aux[source]);
                    if quantum > Fixed64::ZERO {
                        if vars.temperature_c >= flow.burn_temp {
                            delta.aux[source] = -quantum;
                            delta.aux[AX_BURNT] = quantum;
                            delta.aux[AX_COOLDOWN] =
                                Fixed64::from_num(flow.cooldown_ticks as i64);
                            code = ST_BURNING;
                        } else if vars.temperature_c < flow.band_low {
                            if from_start {
                                delta.aux[AX_START_TANK] = -quantum;
                                delta.aux[AX_BALANCE_TANK] = quantum;
                            }
                            delta.temperature_c += flow.recirc_heat;
                            code = ST_RECIRCULATING;
                        } else if vars.temperature_c > flow.band_high {
                            // Too hot to credit but not yet scorched;
                            // the quantum goes back round untreated.
                            if from_start {
                                delta.aux[AX_START_TANK] = -quantum;
                                delta.aux[AX_BALANCE_TANK] = quantum;
                            }
                            code = ST_RECIRCULATING;
                        } else {
                            delta.aux[source] = -quantum;
                            delta.aux[AX_PASTEURIZED] = quantum;
                            delta.milk_l = quantum;
                            code = ST_PASTEURIZING;
                        }
                    }
                    delta.aux[AX_STATUS] = Fixed64::from_num(code) - vars.aux[AX_STATUS];
                    delta
                }),
                Box::new(|vars, _| {
                    vars.aux[AX_START_TANK] <= EPSILON && vars.aux[AX_BALANCE_TANK] <= EPSILON
                }),
            )
            .with_max_ticks(10_000),
        ],
        on_receive: Box::new(|vars, batch| {
            vars.temperature_c = Fixed64::from_num(20);
            vars.ph = batch.ph;
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_START_TANK] = batch.milk_l;
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| {
            let status = match vars.aux[AX_STATUS].to_num::<i64>() {
                ST_PASTEURIZING => Some("pasteurizing"),
                ST_RECIRCULATING => Some("recirculating"),
                ST_BURNING => Some("burning"),
                ST_COOLING => Some("cooling"),
                _ => None,
            };
            FieldSet {
                phase: status.map(String::from),
                temperature_c: Some(vars.temperature_c),
                milk_l: Some(vars.milk_l),
                start_tank_l: Some(vars.aux[AX_START_TANK]),
                balance_tank_l: Some(vars.aux[AX_BALANCE_TANK]),
                ..FieldSet::default()
            }
        }),
        finish: Box::new(|vars, mut batch| {
            batch.milk_l = vars.aux[AX_PASTEURIZED];
            batch.temperature_c = vars.temperature_c;
            batch
        }),
    }
}
