//! The cheese vat.
//!
//! Nine phases: fill, heat to the ripening setpoint, dose rennet, stir
//! gently, coagulate, cut the coagulum, cook to scald temperature, stir
//! out, and drain standing whey. Four of the phases carry anomaly
//! checkpoints; a fired anomaly shifts a target or sets a sticky curd
//! effect that later phases read to modulate yields and rates.

use curdline_core::anomaly::{AnomalyKind, Checkpoint};
use curdline_core::fixed::{EPSILON, Fixed64, f64_to_fixed64};
use curdline_core::id::StageId;
use curdline_core::log::FieldSet;
use curdline_core::stage::{EffectFlags, PendingDelta, Phase, StageDef};

use crate::params::{CoagulationModel, VatParams};

// aux register layout
const AX_TOTAL: usize = 0;
const AX_TARGET_TEMP: usize = 1;
const AX_FORCED_TEMP: usize = 2;
const AX_CUT_REMAINING: usize = 3;
const AX_WHEY_AT_DRAIN: usize = 4;
const AX_CURD_LOST: usize = 5;
const AX_DRAIN_MOD: usize = 6;
const AUX_LEN: usize = 7;

/// Curd volume fraction and rate modifier under the current effects.
/// Weak curd sets slowly and yields least; rubbery curd sets fast but
/// still yields below normal.
fn coagulation_profile(effects: &EffectFlags) -> (Fixed64, Fixed64) {
    if effects.weak_curds {
        (f64_to_fixed64(0.09), f64_to_fixed64(0.7))
    } else if effects.rubbery_curds {
        (f64_to_fixed64(0.10), f64_to_fixed64(1.2))
    } else {
        (f64_to_fixed64(0.12), Fixed64::ONE)
    }
}

fn cut_modifier(effects: &EffectFlags) -> Fixed64 {
    if effects.weak_curds {
        f64_to_fixed64(0.7)
    } else if effects.rubbery_curds {
        f64_to_fixed64(0.8)
    } else {
        Fixed64::ONE
    }
}

pub fn stage_def(stage: StageId, params: &VatParams) -> StageDef {
    let fill = params.clone();
    let heat = params.clone();
    let heat_done = params.clone();
    let coag = params.clone();
    let cut = params.clone();
    let cook = params.clone();
    let cook_done = params.clone();
    let stir = params.stir_out_ticks;
    let drain = params.clone();
    let drain_done = params.clone();

    let slack = f64_to_fixed64(0.1);

    StageDef {
        stage,
        name: "cheese_vat",
        phases: vec![
            Phase::timed(
                "filling",
                Box::new(move |vars, _, _| PendingDelta {
                    milk_l: fill.fill_per_tick.min(vars.aux[AX_TOTAL] - vars.milk_l),
                    ..PendingDelta::none()
                }),
                Box::new(|vars, _| vars.milk_l >= vars.aux[AX_TOTAL] - EPSILON),
            ),
            Phase::timed(
                "heating",
                Box::new(move |vars, _, _| {
                    let err = vars.aux[AX_TARGET_TEMP] - vars.temperature_c;
                    PendingDelta {
                        temperature_c: err.clamp(-heat.heat_rate, heat.heat_rate),
                        ..PendingDelta::none()
                    }
                }),
                Box::new(move |vars, _| {
                    (vars.aux[AX_TARGET_TEMP] - vars.temperature_c).abs() <= slack
                }),
            )
            .with_checkpoint(Checkpoint::Heating)
            .with_enter(Box::new(move |vars, rng| {
                vars.aux[AX_TARGET_TEMP] = if vars.aux[AX_FORCED_TEMP] != Fixed64::ZERO {
                    vars.aux[AX_FORCED_TEMP]
                } else {
                    rng.uniform(heat_done.set_temp_low, heat_done.set_temp_high)
                };
            })),
            Phase::hold("rennet_dosing", params.rennet_ticks)
                .with_checkpoint(Checkpoint::Rennet),
            Phase::hold("gentle_stirring", params.stir_in_ticks),
            Phase::timed(
                "coagulation",
                Box::new(move |vars, _, _| {
                    let (curd_yield, rate_mod) = coagulation_profile(&vars.effects);
                    let amount = match coag.coagulation {
                        CoagulationModel::BatchScaled => {
                            vars.aux[AX_TOTAL] * coag.coagulation_fraction * rate_mod
                        }
                        CoagulationModel::FixedDuration(n) => {
                            vars.aux[AX_TOTAL] / Fixed64::from_num(n as i64)
                        }
                    };
                    let converted = amount.min(vars.milk_l);
                    PendingDelta {
                        milk_l: -converted,
                        curd_l: converted * curd_yield,
                        whey_l: converted * (Fixed64::ONE - curd_yield),
                        ..PendingDelta::none()
                    }
                }),
                Box::new(|vars, _| vars.milk_l <= EPSILON),
            ),
            Phase::timed(
                "cutting",
                Box::new(move |vars, _, _| {
                    let step = (vars.curd_l * cut.cut_rate * cut_modifier(&vars.effects))
                        .min(vars.aux[AX_CUT_REMAINING]);
                    let mut delta = PendingDelta {
                        curd_l: -step,
                        whey_l: step,
                        ..PendingDelta::none()
                    };
                    delta.aux = vec![Fixed64::ZERO; AUX_LEN];
                    delta.aux[AX_CUT_REMAINING] = -step;
                    delta
                }),
                Box::new(|vars, _| vars.aux[AX_CUT_REMAINING] <= EPSILON),
            )
            .with_checkpoint(Checkpoint::Cutting)
            .with_enter({
                let release = params.cut_release;
                Box::new(move |vars, _| {
                    vars.aux[AX_CUT_REMAINING] = vars.curd_l * release;
                })
            }),
            Phase::timed(
                "cooking",
                Box::new(move |vars, _, _| {
                    let err = cook.cook_temp - vars.temperature_c;
                    PendingDelta {
                        temperature_c: err.clamp(-cook.heat_rate, cook.heat_rate),
                        ..PendingDelta::none()
                    }
                }),
                Box::new(move |vars, _| {
                    (cook_done.cook_temp - vars.temperature_c).abs() <= slack
                }),
            ),
            Phase::timed(
                "stirring_out",
                Box::new(move |vars, rng, _| {
                    let expelled =
                        vars.curd_l * rng.uniform(f64_to_fixed64(0.015), f64_to_fixed64(0.02));
                    let mut fines =
                        vars.curd_l * rng.uniform(Fixed64::ZERO, f64_to_fixed64(0.0025));
                    if vars.effects.small_curds {
                        fines += fines;
                    }
                    let mut delta = PendingDelta {
                        curd_l: -(expelled + fines),
                        whey_l: expelled + fines,
                        ..PendingDelta::none()
                    };
                    delta.aux = vec![Fixed64::ZERO; AUX_LEN];
                    delta.aux[AX_CURD_LOST] = fines;
                    delta
                }),
                Box::new(move |_, t| t >= stir),
            )
            .with_checkpoint(Checkpoint::Stirring),
            Phase::timed(
                "whey_drain",
                Box::new(move |vars, _, _| {
                    let drained = vars.whey_l * drain.drain_rate * vars.aux[AX_DRAIN_MOD];
                    // Curd loss peaks mid-drain as the bed settles.
                    let progress = if vars.aux[AX_WHEY_AT_DRAIN] > EPSILON {
                        Fixed64::ONE - vars.whey_l / vars.aux[AX_WHEY_AT_DRAIN]
                    } else {
                        Fixed64::ZERO
                    };
                    let bell = Fixed64::from_num(4) * progress * (Fixed64::ONE - progress);
                    let fines = vars.curd_l * f64_to_fixed64(0.001) * bell;
                    let mut delta = PendingDelta {
                        whey_l: -drained,
                        curd_l: -fines,
                        ..PendingDelta::none()
                    };
                    delta.aux = vec![Fixed64::ZERO; AUX_LEN];
                    delta.aux[AX_CURD_LOST] = fines;
                    delta
                }),
                Box::new(move |vars, _| vars.whey_l <= drain_done.drain_floor),
            )
            .with_checkpoint(Checkpoint::WheyRelease)
            .with_enter(Box::new(|vars, _| {
                vars.aux[AX_WHEY_AT_DRAIN] = vars.whey_l;
            })),
        ],
        on_receive: Box::new(|vars, batch| {
            vars.temperature_c = f64_to_fixed64(20.0);
            vars.ph = batch.ph;
            vars.aux = vec![Fixed64::ZERO; AUX_LEN];
            vars.aux[AX_TOTAL] = batch.milk_l;
            vars.aux[AX_DRAIN_MOD] = Fixed64::ONE;
        }),
        apply_anomaly: Box::new(|vars, rec| match rec.kind {
            AnomalyKind::TemperatureLow => {
                vars.aux[AX_FORCED_TEMP] = rec.magnitude;
                vars.effects.weak_curds = true;
            }
            AnomalyKind::TemperatureHigh => {
                vars.aux[AX_FORCED_TEMP] = rec.magnitude;
                vars.effects.rubbery_curds = true;
            }
            AnomalyKind::RennetLow => vars.effects.weak_curds = true,
            AnomalyKind::RennetHigh => vars.effects.rubbery_curds = true,
            AnomalyKind::PhOff => {
                vars.ph = rec.magnitude;
                vars.effects.weak_curds = true;
            }
            AnomalyKind::CuttingUneven => vars.effects.uneven_curds = true,
            AnomalyKind::CuttingMechanical => vars.effects.small_curds = true,
            AnomalyKind::StirringExcessive => vars.effects.small_curds = true,
            AnomalyKind::StirringUneven => vars.effects.uneven_curds = true,
            AnomalyKind::DrainClogged => {
                vars.aux[AX_DRAIN_MOD] = f64_to_fixed64(0.5);
                vars.effects.high_moisture = true;
            }
            AnomalyKind::DrainTooFast => {
                vars.aux[AX_DRAIN_MOD] = f64_to_fixed64(2.0);
                vars.effects.small_curds = true;
            }
        }),
        observe: Box::new(|vars| FieldSet {
            milk_l: Some(vars.milk_l),
            whey_l: Some(vars.whey_l),
            curd_l: Some(vars.curd_l),
            temperature_c: Some(vars.temperature_c),
            ph: Some(vars.ph),
            ..FieldSet::default()
        }),
        finish: Box::new(|vars, mut batch| {
            batch.milk_l = vars.milk_l;
            batch.whey_l = vars.whey_l;
            batch.curd_l = vars.curd_l;
            batch.temperature_c = vars.temperature_c;
            batch.ph = vars.ph;
            batch
        }),
    }
}
