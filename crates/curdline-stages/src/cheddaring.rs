//! The cheddaring table.
//!
//! The drained curd knits into slabs which are stacked and turned,
//! pressing whey out so the excess moisture decays toward its floor.
//! Halfway through the slabs are milled into uniform pieces and the
//! decay quickens. Texture develops along a logistic curve throughout;
//! its value rides in an aux register and lands near 10 when the curd
//! is ready for salting.

use curdline_core::fixed::{Fixed64, f64_to_fixed64};
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{PendingDelta, Phase, StageDef};

use crate::params::CheddaringParams;

// aux register layout
const AX_TEXTURE: usize = 0;
const AUX_LEN: usize = 1;

const TEXTURE_CEILING: f64 = 10.0;

fn texture_step(texture: Fixed64, rate: Fixed64) -> Fixed64 {
    let ceiling = f64_to_fixed64(TEXTURE_CEILING);
    rate * texture * (ceiling - texture) / ceiling
}

fn moisture_step(moisture: Fixed64, floor: Fixed64, retention: Fixed64) -> Fixed64 {
    // Excess moisture keeps only `retention` of itself each tick.
    (moisture - floor) * (retention - Fixed64::ONE)
}

fn ph_step(ph: Fixed64, target: Fixed64, retention: Fixed64) -> Fixed64 {
    if ph <= target {
        return Fixed64::ZERO;
    }
    (ph - target) * (retention - Fixed64::ONE)
}

pub fn stage_def(stage: StageId, params: &CheddaringParams) -> StageDef {
    let stack = params.clone();
    let texture = params.clone();
    let mill = params.clone();

    StageDef {
        stage,
        name: "cheddaring_table",
        phases: vec![
            Phase::timed(
                "stacking",
                {
                    let p = stack.clone();
                    Box::new(move |vars, _, _| {
                        let mut delta = PendingDelta {
                            moisture_pct: moisture_step(
                                vars.moisture_pct,
                                p.moisture_floor,
                                p.decay_pre_mill,
                            ),
                            ph: ph_step(vars.ph, p.ph_target, p.ph_retention),
                            ..PendingDelta::none()
                        };
                        delta.aux = vec![texture_step(vars.aux[AX_TEXTURE], p.texture_rate)];
                        delta
                    })
                },
                Box::new(move |_, t| t >= stack.stack_ticks),
            ),
            Phase::timed(
                "texturing",
                {
                    let p = texture.clone();
                    Box::new(move |vars, _, _| {
                        let mut delta = PendingDelta {
                            moisture_pct: moisture_step(
                                vars.moisture_pct,
                                p.moisture_floor,
                                p.decay_post_mill,
                            ),
                            ph: ph_step(vars.ph, p.ph_target, p.ph_retention),
                            ..PendingDelta::none()
                        };
                        delta.aux = vec![texture_step(vars.aux[AX_TEXTURE], p.texture_rate)];
                        delta
                    })
                },
                Box::new(move |_, t| t >= texture.texture_ticks),
            )
            .with_enter(Box::new(move |vars, _| {
                // Milling: the stacked mass becomes uniform pieces.
                vars.units = (vars.mass_kg / mill.slab_mass).to_num::<i64>().max(1) as u32;
            })),
        ],
        on_receive: Box::new(|vars, batch| {
            vars.curd_l = batch.curd_l;
            vars.mass_kg = batch.mass_kg;
            vars.moisture_pct = batch.moisture_pct;
            vars.temperature_c = batch.temperature_c;
            vars.ph = batch.ph;
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_TEXTURE] = f64_to_fixed64(0.11);
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            moisture_pct: Some(vars.moisture_pct),
            mass_kg: Some(vars.mass_kg),
            ph: Some(vars.ph),
            ..FieldSet::default()
        }),
        finish: Box::new(|vars, mut batch| {
            batch.moisture_pct = vars.moisture_pct;
            batch.ph = vars.ph;
            batch.units = vars.units;
            batch
        }),
    }
}
