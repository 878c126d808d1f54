//! The cheese press.
//!
//! Wheels are pressed at a set pressure for a set time; moisture falls
//! in proportion to pressure and duration down to a floor, and the
//! squeezed whey takes a little weight with it. The press wears with
//! every wheel and stops for maintenance when its health falls below
//! threshold; maintenance restores it to full. Occasionally a pressing
//! faults and leaves the wheel slightly wet and light.
//!
//! Health is a property of the machine, not the batch, so it lives in a
//! shared cell the definition's hooks read and write across batches.

use std::cell::Cell;
use std::rc::Rc;

use curdline_core::fixed::{Fixed64, f64_to_fixed64};
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{PendingDelta, Phase, StageDef};

use crate::params::PresserParams;

// aux register layout
const AX_PRESSURE: usize = 0;
const AX_HEALTH: usize = 1;
const AX_MAINT_TICKS: usize = 2;
const AX_FAULTED: usize = 3;
const AUX_LEN: usize = 4;

pub fn stage_def(stage: StageId, params: &PresserParams) -> StageDef {
    let health = Rc::new(Cell::new(f64_to_fixed64(100.0)));

    let recv = params.clone();
    let recv_health = Rc::clone(&health);
    let serviced = Rc::clone(&health);
    let squeeze = params.clone();
    let squeeze_health = Rc::clone(&health);
    let block = params.block_weight;

    StageDef {
        stage,
        name: "cheese_press",
        phases: vec![
            Phase::timed(
                "maintenance",
                Box::new(|_, _, _| PendingDelta::none()),
                Box::new(|vars, t| t >= vars.aux[AX_MAINT_TICKS].to_num::<u64>()),
            ),
            Phase::hold("pressing", params.press_ticks).with_enter(Box::new(move |vars, _| {
                if vars.aux[AX_MAINT_TICKS] > Fixed64::ZERO {
                    serviced.set(f64_to_fixed64(100.0));
                    vars.aux[AX_HEALTH] = serviced.get();
                }
            })),
            Phase::timed(
                "release",
                Box::new(|_, _, _| PendingDelta::none()),
                Box::new(|_, t| t >= 1),
            )
            .with_enter(Box::new(move |vars, rng| {
                let reduction = f64_to_fixed64(0.05)
                    * (vars.aux[AX_PRESSURE] / f64_to_fixed64(50.0))
                    * (Fixed64::from_num(squeeze.press_ticks as i64) / f64_to_fixed64(60.0));
                vars.moisture_pct = (vars.moisture_pct - reduction * f64_to_fixed64(100.0))
                    .max(squeeze.moisture_floor);
                vars.mass_kg -= vars.mass_kg * reduction * f64_to_fixed64(0.9);

                if rng.chance(squeeze.fault_probability) {
                    vars.moisture_pct += f64_to_fixed64(2.0);
                    vars.mass_kg = (vars.mass_kg - f64_to_fixed64(0.1)).max(Fixed64::ZERO);
                    vars.aux[AX_FAULTED] = Fixed64::ONE;
                }

                let wear = rng.uniform(squeeze.wear_low, squeeze.wear_high);
                squeeze_health.set(squeeze_health.get() - wear);
                vars.aux[AX_HEALTH] = squeeze_health.get();
            })),
        ],
        on_receive: Box::new(move |vars, batch| {
            vars.mass_kg = batch.mass_kg;
            vars.moisture_pct = batch.moisture_pct;
            vars.salt_kg = batch.salt_kg;
            vars.units = batch.units;
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_PRESSURE] = recv.pressure_psi;
            vars.aux[AX_HEALTH] = recv_health.get();
            if recv_health.get() < recv.maintenance_threshold {
                vars.aux[AX_MAINT_TICKS] = Fixed64::from_num(recv.maintenance_ticks as i64);
            }
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            mass_kg: Some(vars.mass_kg),
            moisture_pct: Some(vars.moisture_pct),
            pressure_psi: Some(vars.aux[AX_PRESSURE]),
            ..FieldSet::default()
        }),
        finish: Box::new(move |vars, mut batch| {
            batch.mass_kg = vars.mass_kg;
            batch.moisture_pct = vars.moisture_pct;
            // The pressed mass is formed into blocks of the configured
            // weight; a light batch still forms one block.
            vars.units = (vars.mass_kg / block).to_num::<i64>().max(1) as u32;
            batch.units = vars.units;
            batch
        }),
    }
}
