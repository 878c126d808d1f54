//! Stage parameter records.
//!
//! Every machine takes a plain serde-friendly record of fixed-point
//! settings with plant defaults. `validate` rejects settings a real
//! line could not run with before any process is spawned.

use curdline_core::error::SimError;
use curdline_core::fixed::{Fixed64, f64_to_fixed64};
use curdline_core::id::StageId;
use serde::{Deserialize, Serialize};

fn fx(v: f64) -> Fixed64 {
    f64_to_fixed64(v)
}

fn defect(stage: StageId, reason: impl Into<String>) -> SimError {
    SimError::ConfigDefect {
        stage,
        reason: reason.into(),
    }
}

/// How a drain-to-target predicate treats the target value. `Exclusive`
/// stops once the value is within the working slack of the target;
/// `Inclusive` insists on reaching it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    Exclusive,
    Inclusive,
}

/// How coagulation paces the milk-to-curd conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoagulationModel {
    /// Convert a fixed fraction of the batch per tick, so bigger
    /// batches take the same number of ticks.
    BatchScaled,
    /// Convert over a fixed number of ticks regardless of batch size.
    FixedDuration(u64),
}

// ---------------------------------------------------------------------------
// Per-stage records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteuriserParams {
    /// Holding-tube setpoint in degrees C.
    pub optimal_temp: Fixed64,
    /// Lower edge of the acceptable band; cooler milk recirculates.
    pub band_low: Fixed64,
    /// Upper edge of the acceptable band.
    pub band_high: Fixed64,
    /// At or above this the milk scorches and the unit cools down.
    pub burn_temp: Fixed64,
    /// Litres pushed through the tube per tick.
    pub flow_per_tick: Fixed64,
    /// Warm-up ticks before any milk flows.
    pub startup_ticks: u64,
    /// Forced-cooling ticks after a burn, one degree lost per tick.
    pub cooldown_ticks: u64,
    /// Temperature gained by recirculated milk on its way back.
    pub recirc_heat: Fixed64,
    /// Half-width of the per-tick temperature noise.
    pub noise: Fixed64,
}

impl Default for PasteuriserParams {
    fn default() -> Self {
        Self {
            optimal_temp: fx(72.0),
            band_low: fx(70.0),
            band_high: fx(74.0),
            burn_temp: fx(77.0),
            flow_per_tick: fx(41.7),
            startup_ticks: 20,
            cooldown_ticks: 8,
            recirc_heat: fx(1.5),
            noise: fx(2.0),
        }
    }
}

impl PasteuriserParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.flow_per_tick <= Fixed64::ZERO {
            return Err(defect(stage, "flow_per_tick must be positive"));
        }
        if !(self.band_low < self.band_high && self.band_high < self.burn_temp) {
            return Err(defect(stage, "bands must order band_low < band_high < burn_temp"));
        }
        if self.optimal_temp < self.band_low || self.optimal_temp > self.band_high {
            return Err(defect(stage, "optimal_temp must sit inside the band"));
        }
        if self.noise < Fixed64::ZERO {
            return Err(defect(stage, "noise must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VatParams {
    /// Litres pumped in per tick while filling.
    pub fill_per_tick: Fixed64,
    /// Setpoint band for the ripening temperature draw.
    pub set_temp_low: Fixed64,
    pub set_temp_high: Fixed64,
    /// Cooking (scald) temperature.
    pub cook_temp: Fixed64,
    /// Degrees moved per tick while heating.
    pub heat_rate: Fixed64,
    /// Ticks spent dosing rennet.
    pub rennet_ticks: u64,
    /// Ticks of gentle stirring before coagulation.
    pub stir_in_ticks: u64,
    /// Ticks of stirring after the cook.
    pub stir_out_ticks: u64,
    pub coagulation: CoagulationModel,
    /// Fraction of the batch converted per tick under `BatchScaled`.
    pub coagulation_fraction: Fixed64,
    /// Fraction of curd released as whey during cutting.
    pub cut_release: Fixed64,
    /// Fraction of curd cut free per tick.
    pub cut_rate: Fixed64,
    /// Fraction of standing whey drained per tick.
    pub drain_rate: Fixed64,
    /// Whey level at which the drain phase hands over to the drainer.
    pub drain_floor: Fixed64,
}

impl Default for VatParams {
    fn default() -> Self {
        Self {
            fill_per_tick: fx(100.0),
            set_temp_low: fx(31.0),
            set_temp_high: fx(33.0),
            cook_temp: fx(39.0),
            heat_rate: fx(0.2),
            rennet_ticks: 8,
            stir_in_ticks: 20,
            stir_out_ticks: 15,
            coagulation: CoagulationModel::BatchScaled,
            coagulation_fraction: fx(0.02),
            cut_release: fx(0.2),
            cut_rate: fx(0.02),
            drain_rate: fx(0.05),
            drain_floor: fx(0.5),
        }
    }
}

impl VatParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.fill_per_tick <= Fixed64::ZERO {
            return Err(defect(stage, "fill_per_tick must be positive"));
        }
        if self.set_temp_low > self.set_temp_high {
            return Err(defect(stage, "set_temp band is inverted"));
        }
        if self.cook_temp <= self.set_temp_high {
            return Err(defect(stage, "cook_temp must exceed the set band"));
        }
        if self.heat_rate <= Fixed64::ZERO {
            return Err(defect(stage, "heat_rate must be positive"));
        }
        for (name, v) in [
            ("coagulation_fraction", self.coagulation_fraction),
            ("cut_release", self.cut_release),
            ("cut_rate", self.cut_rate),
            ("drain_rate", self.drain_rate),
        ] {
            if v <= Fixed64::ZERO || v > Fixed64::ONE {
                return Err(defect(stage, format!("{name} must be in (0, 1]")));
            }
        }
        if let CoagulationModel::FixedDuration(0) = self.coagulation {
            return Err(defect(stage, "fixed coagulation duration must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CutterParams {
    /// Particles produced per litre of curd.
    pub particles_per_litre: Fixed64,
    /// Sharpness lost per particle cut.
    pub wear_per_cut: Fixed64,
    /// Sharpness never drops below this.
    pub min_sharpness: Fixed64,
    /// Nominal auger speed in rpm.
    pub auger_speed: Fixed64,
    /// Half-width of the per-particle auger jitter.
    pub auger_jitter: Fixed64,
    /// Volume fraction of each particle kept as curd; the rest weeps
    /// out as whey.
    pub curd_fraction: Fixed64,
}

impl Default for CutterParams {
    fn default() -> Self {
        Self {
            particles_per_litre: fx(10.0),
            wear_per_cut: fx(0.5),
            min_sharpness: fx(50.0),
            auger_speed: fx(60.0),
            auger_jitter: fx(5.0),
            curd_fraction: fx(0.9),
        }
    }
}

impl CutterParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.particles_per_litre <= Fixed64::ZERO {
            return Err(defect(stage, "particles_per_litre must be positive"));
        }
        if self.curd_fraction <= Fixed64::ZERO || self.curd_fraction > Fixed64::ONE {
            return Err(defect(stage, "curd_fraction must be in (0, 1]"));
        }
        if self.min_sharpness <= Fixed64::ZERO {
            return Err(defect(stage, "min_sharpness must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainerParams {
    /// Moisture percentage the curd bed starts at.
    pub initial_moisture: Fixed64,
    /// Moisture percentage to drain down to.
    pub target_moisture: Fixed64,
    pub boundary: BoundaryPolicy,
    /// Slack applied under `BoundaryPolicy::Exclusive`.
    pub moisture_slack: Fixed64,
    /// Ticks the nominal drain schedule spans.
    pub drain_ticks: u64,
    /// Bed temperature at the start and end of the drain.
    pub start_temp: Fixed64,
    pub end_temp: Fixed64,
    /// Curd fraction lost to the drain per tick, low and high draw.
    pub curd_loss_low: Fixed64,
    pub curd_loss_high: Fixed64,
    /// Kilograms of pressed curd per litre, applied when the bed is
    /// weighed off.
    pub curd_density: Fixed64,
}

impl Default for DrainerParams {
    fn default() -> Self {
        Self {
            initial_moisture: fx(80.0),
            target_moisture: fx(58.0),
            boundary: BoundaryPolicy::Exclusive,
            moisture_slack: fx(0.1),
            drain_ticks: 12,
            start_temp: fx(38.0),
            end_temp: fx(32.0),
            curd_loss_low: fx(0.002),
            curd_loss_high: fx(0.005),
            curd_density: fx(1.05),
        }
    }
}

impl DrainerParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.target_moisture >= self.initial_moisture {
            return Err(defect(stage, "target_moisture must be below initial_moisture"));
        }
        if self.target_moisture <= Fixed64::ZERO {
            return Err(defect(stage, "target_moisture must be positive"));
        }
        if self.drain_ticks == 0 {
            return Err(defect(stage, "drain_ticks must be non-zero"));
        }
        if self.curd_loss_low > self.curd_loss_high {
            return Err(defect(stage, "curd loss range is inverted"));
        }
        if self.curd_density <= Fixed64::ZERO {
            return Err(defect(stage, "curd_density must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheddaringParams {
    /// Ticks of stacking before the slabs are milled.
    pub stack_ticks: u64,
    /// Ticks of texturing after milling.
    pub texture_ticks: u64,
    /// Moisture asymptote the slabs settle toward.
    pub moisture_floor: Fixed64,
    /// Per-tick retention factor of the excess moisture while stacked.
    pub decay_pre_mill: Fixed64,
    /// Faster retention factor once milled.
    pub decay_post_mill: Fixed64,
    /// Kilograms per milled slab.
    pub slab_mass: Fixed64,
    /// Logistic rate of texture development per tick.
    pub texture_rate: Fixed64,
    /// Acidification target pH.
    pub ph_target: Fixed64,
    /// Per-tick retention factor of the excess acidity.
    pub ph_retention: Fixed64,
}

impl Default for CheddaringParams {
    fn default() -> Self {
        Self {
            stack_ticks: 6,
            texture_ticks: 6,
            moisture_floor: fx(45.0),
            // exp(-0.02 * 15) and exp(-0.025 * 15) for 15-minute ticks.
            decay_pre_mill: fx(0.740818),
            decay_post_mill: fx(0.687289),
            slab_mass: fx(2.5),
            texture_rate: fx(0.075),
            ph_target: fx(5.4),
            ph_retention: fx(0.8),
        }
    }
}

impl CheddaringParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        for (name, v) in [
            ("decay_pre_mill", self.decay_pre_mill),
            ("decay_post_mill", self.decay_post_mill),
            ("ph_retention", self.ph_retention),
        ] {
            if v <= Fixed64::ZERO || v >= Fixed64::ONE {
                return Err(defect(stage, format!("{name} must be in (0, 1)")));
            }
        }
        if self.slab_mass <= Fixed64::ZERO {
            return Err(defect(stage, "slab_mass must be positive"));
        }
        if self.stack_ticks == 0 {
            return Err(defect(stage, "stack_ticks must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaltingParams {
    /// Kilograms of salt per kilogram of curd.
    pub salt_recipe: Fixed64,
    /// Ticks the salted curd mellows before pressing.
    pub mellowing_ticks: u64,
}

impl Default for SaltingParams {
    fn default() -> Self {
        Self {
            salt_recipe: fx(0.033),
            mellowing_ticks: 10,
        }
    }
}

impl SaltingParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.salt_recipe <= Fixed64::ZERO || self.salt_recipe >= Fixed64::ONE {
            return Err(defect(stage, "salt_recipe must be in (0, 1)"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresserParams {
    /// Applied pressure in psi.
    pub pressure_psi: Fixed64,
    /// Press duration in ticks.
    pub press_ticks: u64,
    /// Moisture percentage pressing cannot go below.
    pub moisture_floor: Fixed64,
    /// Health lost per pressing, low and high draw.
    pub wear_low: Fixed64,
    pub wear_high: Fixed64,
    /// Below this health the press stops for maintenance.
    pub maintenance_threshold: Fixed64,
    /// Ticks a maintenance stop takes.
    pub maintenance_ticks: u64,
    /// Chance a pressing leaves the wheel slightly wet and light.
    pub fault_probability: Fixed64,
    /// Kilograms per pressed block.
    pub block_weight: Fixed64,
}

impl Default for PresserParams {
    fn default() -> Self {
        Self {
            pressure_psi: fx(50.0),
            press_ticks: 60,
            moisture_floor: fx(32.0),
            wear_low: fx(1.0),
            wear_high: fx(3.0),
            maintenance_threshold: fx(85.0),
            maintenance_ticks: 10,
            fault_probability: fx(0.05),
            block_weight: fx(5.0),
        }
    }
}

impl PresserParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.pressure_psi <= Fixed64::ZERO {
            return Err(defect(stage, "pressure_psi must be positive"));
        }
        if self.press_ticks == 0 {
            return Err(defect(stage, "press_ticks must be non-zero"));
        }
        if self.wear_low > self.wear_high {
            return Err(defect(stage, "wear range is inverted"));
        }
        if self.fault_probability < Fixed64::ZERO || self.fault_probability > Fixed64::ONE {
            return Err(defect(stage, "fault_probability must be in [0, 1]"));
        }
        if self.block_weight <= Fixed64::ZERO {
            return Err(defect(stage, "block_weight must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RipenerParams {
    /// Cellar temperature in degrees C.
    pub cellar_temp: Fixed64,
    /// Degrees the wheel moves toward cellar temperature per tick.
    pub cooling_rate: Fixed64,
    /// Moisture points lost to the cellar air per tick.
    pub moisture_drift: Fixed64,
    /// pH lost to proteolysis per tick.
    pub ph_drift: Fixed64,
    /// Ticks each wheel is observed on the shelf.
    pub observe_ticks: u64,
}

impl Default for RipenerParams {
    fn default() -> Self {
        Self {
            cellar_temp: fx(13.0),
            cooling_rate: fx(0.5),
            moisture_drift: fx(0.05),
            ph_drift: fx(0.005),
            observe_ticks: 24,
        }
    }
}

impl RipenerParams {
    pub fn validate(&self, stage: StageId) -> Result<(), SimError> {
        if self.cooling_rate <= Fixed64::ZERO {
            return Err(defect(stage, "cooling_rate must be positive"));
        }
        if self.moisture_drift < Fixed64::ZERO || self.ph_drift < Fixed64::ZERO {
            return Err(defect(stage, "drift rates must be non-negative"));
        }
        if self.observe_ticks == 0 {
            return Err(defect(stage, "observe_ticks must be non-zero"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Whole-line record
// ---------------------------------------------------------------------------

/// Settings for the full eight-machine line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineParams {
    pub pasteuriser: PasteuriserParams,
    pub vat: VatParams,
    pub cutter: CutterParams,
    pub drainer: DrainerParams,
    pub cheddaring: CheddaringParams,
    pub salting: SaltingParams,
    pub presser: PresserParams,
    pub ripener: RipenerParams,
    /// Bound on every inter-stage store.
    pub buffer_capacity: Option<usize>,
    /// Per-checkpoint anomaly fire chance in [0, 1].
    pub anomaly_probability: Fixed64,
}

impl LineParams {
    pub fn validate(&self) -> Result<(), SimError> {
        use crate::line;
        self.pasteuriser.validate(line::PASTEURISER)?;
        self.vat.validate(line::VAT)?;
        self.cutter.validate(line::CUTTER)?;
        self.drainer.validate(line::DRAINER)?;
        self.cheddaring.validate(line::CHEDDARING)?;
        self.salting.validate(line::SALTING)?;
        self.presser.validate(line::PRESSER)?;
        self.ripener.validate(line::RIPENER)?;
        if self.anomaly_probability < Fixed64::ZERO || self.anomaly_probability > Fixed64::ONE {
            return Err(defect(line::VAT, "anomaly_probability must be in [0, 1]"));
        }
        if self.buffer_capacity == Some(0) {
            return Err(defect(line::PASTEURISER, "buffer_capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        LineParams::default().validate().unwrap();
    }

    #[test]
    fn inverted_band_is_a_config_defect() {
        let mut p = PasteuriserParams::default();
        p.band_low = fx(80.0);
        let err = p.validate(StageId(0)).unwrap_err();
        assert!(matches!(err, SimError::ConfigDefect { .. }));
    }

    #[test]
    fn zero_duration_coagulation_rejected() {
        let mut p = VatParams::default();
        p.coagulation = CoagulationModel::FixedDuration(0);
        assert!(p.validate(StageId(1)).is_err());
    }

    #[test]
    fn target_above_initial_moisture_rejected() {
        let mut p = DrainerParams::default();
        p.target_moisture = fx(90.0);
        assert!(p.validate(StageId(3)).is_err());
    }

    #[test]
    fn zero_capacity_line_rejected() {
        let mut p = LineParams::default();
        p.buffer_capacity = Some(0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn params_round_trip_through_serde() {
        let p = LineParams::default();
        let json = serde_json::to_string(&p).unwrap();
        let back: LineParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.vat.cook_temp, p.vat.cook_temp);
        assert_eq!(back.salting.salt_recipe, p.salting.salt_recipe);
        assert_eq!(back.buffer_capacity, p.buffer_capacity);
    }
}
