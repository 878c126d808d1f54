//! The ripening cellar.
//!
//! Terminal stage: pressed wheels go onto the shelf, cool toward the
//! cellar temperature, and are observed for a fixed window before the
//! line's attention moves to the next wheel. The cellar keeps a running
//! total of shelved mass across the whole run.

use std::cell::Cell;
use std::rc::Rc;

use curdline_core::fixed::Fixed64;
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{PendingDelta, Phase, StageDef};

use crate::params::RipenerParams;

// aux register layout
const AX_SHELVED_KG: usize = 0;
const AUX_LEN: usize = 1;

/// Ripening style implied by a cellar temperature, coldest to warmest.
/// Labels every record the cellar emits.
pub fn ripening_style(cellar_temp: Fixed64) -> &'static str {
    if cellar_temp < Fixed64::from_num(3) {
        "cold store"
    } else if cellar_temp < Fixed64::from_num(7) {
        "slow maturation"
    } else if cellar_temp <= Fixed64::from_num(13) {
        "classic cellar"
    } else if cellar_temp < Fixed64::from_num(17) {
        "accelerated"
    } else {
        "warm room"
    }
}

pub fn stage_def(stage: StageId, params: &RipenerParams) -> StageDef {
    let shelved = Rc::new(Cell::new(Fixed64::ZERO));
    let recv_total = Rc::clone(&shelved);

    let cool = params.clone();
    let window = params.observe_ticks;

    StageDef {
        stage,
        name: "ripening_cellar",
        phases: vec![Phase::timed(
            ripening_style(params.cellar_temp),
            Box::new(move |vars, _, _| {
                let err = cool.cellar_temp - vars.temperature_c;
                PendingDelta {
                    temperature_c: err.clamp(-cool.cooling_rate, cool.cooling_rate),
                    moisture_pct: -cool.moisture_drift.min(vars.moisture_pct),
                    ph: -cool.ph_drift.min(vars.ph),
                    ..PendingDelta::none()
                }
            }),
            Box::new(move |_, t| t >= window),
        )],
        on_receive: Box::new(move |vars, batch| {
            vars.mass_kg = batch.mass_kg;
            vars.moisture_pct = batch.moisture_pct;
            vars.salt_kg = batch.salt_kg;
            vars.temperature_c = batch.temperature_c;
            vars.ph = batch.ph;
            recv_total.set(recv_total.get() + batch.mass_kg);
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_SHELVED_KG] = recv_total.get();
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            mass_kg: Some(vars.aux[AX_SHELVED_KG]),
            moisture_pct: Some(vars.moisture_pct),
            temperature_c: Some(vars.temperature_c),
            ph: Some(vars.ph),
            salt_kg: Some(vars.salt_kg),
            ..FieldSet::default()
        }),
        finish: Box::new(|_, batch| batch),
    }
}
