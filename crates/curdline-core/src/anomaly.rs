//! Weighted anomaly injection.
//!
//! Stages consult the injector at named checkpoints (once per phase
//! start). A roll either fires or not at the stage's configured
//! probability; when it fires, exactly one anomaly kind is drawn from
//! the checkpoint's fixed candidate set by weighted selection, with a
//! magnitude from the kind's documented range. Anomalies are modeled
//! behavior, never errors.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::rng::SimRng;

/// A named point in a stage's phase sequence where process anomalies
/// can occur. Consulted in phase order, so the injector's call order
/// matches the log order for a fixed seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    Heating,
    Rennet,
    Cutting,
    Stirring,
    WheyRelease,
}

/// Specific process fault kinds, grouped by checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    TemperatureLow,
    TemperatureHigh,
    RennetLow,
    RennetHigh,
    PhOff,
    CuttingUneven,
    CuttingMechanical,
    StirringExcessive,
    StirringUneven,
    DrainClogged,
    DrainTooFast,
}

impl AnomalyKind {
    /// Human-readable label, used in log descriptions.
    pub fn label(self) -> &'static str {
        match self {
            AnomalyKind::TemperatureLow => "underheated milk",
            AnomalyKind::TemperatureHigh => "overheated milk",
            AnomalyKind::RennetLow => "too little rennet added",
            AnomalyKind::RennetHigh => "too much rennet added",
            AnomalyKind::PhOff => "ph not optimal",
            AnomalyKind::CuttingUneven => "inconsistent cutting pattern",
            AnomalyKind::CuttingMechanical => "mechanical fault / dull blade",
            AnomalyKind::StirringExcessive => "over-stirring (high shear)",
            AnomalyKind::StirringUneven => "uneven stirring/heating",
            AnomalyKind::DrainClogged => "drain valve jammed/clogged",
            AnomalyKind::DrainTooFast => "drain too fast",
        }
    }

    /// Magnitude range for kinds that carry a drawn value: off-target
    /// temperatures in degrees C, off-target pH in pH units. Kinds with
    /// a fixed effect have no range and a zero magnitude.
    fn magnitude_range(self) -> Option<(Fixed64, Fixed64)> {
        match self {
            AnomalyKind::TemperatureLow => Some((f64_to_fixed64(28.0), f64_to_fixed64(30.0))),
            AnomalyKind::TemperatureHigh => Some((f64_to_fixed64(34.0), f64_to_fixed64(40.0))),
            AnomalyKind::PhOff => Some((f64_to_fixed64(6.3), f64_to_fixed64(6.8))),
            _ => None,
        }
    }
}

impl Checkpoint {
    /// The fixed candidate set and selection weights for this
    /// checkpoint. Weights reflect relative plant-floor frequency;
    /// they need not sum to anything in particular.
    pub fn candidates(self) -> &'static [(AnomalyKind, u32)] {
        match self {
            Checkpoint::Heating => &[
                (AnomalyKind::TemperatureLow, 3),
                (AnomalyKind::TemperatureHigh, 3),
            ],
            Checkpoint::Rennet => &[
                (AnomalyKind::RennetLow, 3),
                (AnomalyKind::RennetHigh, 3),
                (AnomalyKind::PhOff, 1),
            ],
            Checkpoint::Cutting => &[
                (AnomalyKind::CuttingUneven, 2),
                (AnomalyKind::CuttingMechanical, 2),
            ],
            Checkpoint::Stirring => &[
                (AnomalyKind::StirringExcessive, 2),
                (AnomalyKind::StirringUneven, 2),
            ],
            Checkpoint::WheyRelease => &[
                (AnomalyKind::DrainClogged, 2),
                (AnomalyKind::DrainTooFast, 2),
            ],
        }
    }
}

/// One injected anomaly, attached to the batch that suffered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub checkpoint: Checkpoint,
    pub kind: AnomalyKind,
    /// Drawn off-target value for kinds with a magnitude range, zero
    /// otherwise.
    pub magnitude: Fixed64,
}

/// Seeded injector owned by one stage process.
///
/// Fixed seed plus fixed call order reproduce the same anomaly records
/// run after run.
#[derive(Debug, Clone)]
pub struct AnomalyInjector {
    rng: SimRng,
    probability: Fixed64,
    tally: BTreeMap<AnomalyKind, u32>,
}

impl AnomalyInjector {
    /// `probability` is the per-consultation fire chance in [0, 1].
    pub fn new(rng: SimRng, probability: Fixed64) -> Self {
        Self {
            rng,
            probability,
            tally: BTreeMap::new(),
        }
    }

    /// An injector that never fires (probability zero).
    pub fn disabled() -> Self {
        Self::new(SimRng::new(0), Fixed64::ZERO)
    }

    /// Consult the injector at a checkpoint. At most one anomaly per
    /// consultation.
    pub fn roll(&mut self, checkpoint: Checkpoint) -> Option<AnomalyRecord> {
        if !self.rng.chance(self.probability) {
            return None;
        }
        let candidates = checkpoint.candidates();
        let weights: Vec<Fixed64> = candidates
            .iter()
            .map(|(_, w)| Fixed64::from_num(*w))
            .collect();
        let idx = self.rng.pick_weighted(&weights)?;
        let kind = candidates[idx].0;
        let magnitude = match kind.magnitude_range() {
            Some((lo, hi)) => self.rng.uniform(lo, hi),
            None => Fixed64::ZERO,
        };
        *self.tally.entry(kind).or_insert(0) += 1;
        Some(AnomalyRecord {
            checkpoint,
            kind,
            magnitude,
        })
    }

    /// Per-kind counts of fired anomalies, for end-of-run reports.
    pub fn tally(&self) -> &BTreeMap<AnomalyKind, u32> {
        &self.tally
    }
}
