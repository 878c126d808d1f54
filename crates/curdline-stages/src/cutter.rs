//! The curd cutter.
//!
//! The coagulated curd is divided into discrete particles, one forked
//! child per particle within a single tick. Each particle is cut with
//! whatever sharpness the blade has left (wear accumulates over the
//! batch) and split into a curd share and a weep of whey. The children
//! accumulate into shared registers which the parent folds back into
//! the batch.

use std::rc::Rc;

use curdline_core::fixed::{Fixed64, checked_div_64};
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{Phase, PhaseBody, StageDef, StageVars, DEFAULT_MAX_TICKS};

use crate::params::CutterParams;

// aux register layout
const AX_PARTICLE_L: usize = 0;
const AX_CURD_OUT: usize = 1;
const AX_WHEY_OUT: usize = 2;
const AX_SHARPNESS: usize = 3;
const AX_AUGER: usize = 4;
const AUX_LEN: usize = 5;

pub fn stage_def(stage: StageId, params: &CutterParams) -> StageDef {
    let recv = params.clone();
    let unit = params.clone();

    StageDef {
        stage,
        name: "curd_cutter",
        phases: vec![Phase {
            name: "cutting",
            checkpoint: None,
            max_ticks: DEFAULT_MAX_TICKS,
            enter: None,
            body: PhaseBody::PerUnit {
                count: Box::new(|vars| vars.units),
                unit: Rc::new(move |vars: &mut StageVars, rng, i| {
                    let sharpness = (Fixed64::from_num(100)
                        - unit.wear_per_cut * Fixed64::from_num(i))
                    .max(unit.min_sharpness);
                    let auger = unit.auger_speed
                        + rng.uniform(-unit.auger_jitter, unit.auger_jitter);

                    let share = vars.aux[AX_PARTICLE_L];
                    vars.aux[AX_CURD_OUT] += share * unit.curd_fraction;
                    vars.aux[AX_WHEY_OUT] += share * (Fixed64::ONE - unit.curd_fraction);
                    vars.aux[AX_SHARPNESS] = sharpness;
                    vars.aux[AX_AUGER] = auger;

                    FieldSet {
                        curd_l: Some(vars.aux[AX_CURD_OUT]),
                        whey_l: Some(vars.whey_l + vars.aux[AX_WHEY_OUT]),
                        blade_sharpness: Some(sharpness),
                        auger_speed: Some(auger),
                        ..FieldSet::default()
                    }
                }),
            },
        }],
        on_receive: Box::new(move |vars, batch| {
            vars.curd_l = batch.curd_l;
            vars.whey_l = batch.whey_l;
            vars.temperature_c = batch.temperature_c;
            vars.ph = batch.ph;
            vars.units = (batch.curd_l * recv.particles_per_litre).to_num::<i64>().max(0) as u32;
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_PARTICLE_L] =
                checked_div_64(batch.curd_l, Fixed64::from_num(vars.units.max(1)))
                    .unwrap_or(Fixed64::ZERO);
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            curd_l: Some(vars.curd_l),
            whey_l: Some(vars.whey_l),
            ..FieldSet::default()
        }),
        finish: Box::new(|vars, mut batch| {
            if vars.units > 0 {
                batch.curd_l = vars.aux[AX_CURD_OUT];
                batch.whey_l = vars.whey_l + vars.aux[AX_WHEY_OUT];
            }
            batch.units = vars.units;
            batch
        }),
    }
}
