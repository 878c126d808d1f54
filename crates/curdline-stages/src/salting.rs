//! Salting and mellowing.
//!
//! Dry salt is dispensed by recipe weight onto the milled curd, then
//! the curd rests so the salt draws out the last film of surface whey
//! before pressing.

use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{PendingDelta, Phase, StageDef};

use crate::params::SaltingParams;

pub fn stage_def(stage: StageId, params: &SaltingParams) -> StageDef {
    let recipe = params.salt_recipe;

    StageDef {
        stage,
        name: "salting",
        phases: vec![
            Phase::timed(
                "salt_dispensing",
                Box::new(move |vars, _, _| PendingDelta {
                    salt_kg: vars.mass_kg * recipe,
                    ..PendingDelta::none()
                }),
                Box::new(|_, t| t >= 1),
            ),
            Phase::hold("mellowing", params.mellowing_ticks),
        ],
        on_receive: Box::new(|vars, batch| {
            vars.mass_kg = batch.mass_kg;
            vars.moisture_pct = batch.moisture_pct;
            vars.units = batch.units;
        }),
        apply_anomaly: Box::new(|_, _| {}),
        observe: Box::new(|vars| FieldSet {
            mass_kg: Some(vars.mass_kg),
            salt_kg: Some(vars.salt_kg),
            moisture_pct: Some(vars.moisture_pct),
            ..FieldSet::default()
        }),
        finish: Box::new(|vars, mut batch| {
            batch.salt_kg = vars.salt_kg;
            batch.mass_kg = vars.mass_kg + vars.salt_kg;
            batch
        }),
    }
}
