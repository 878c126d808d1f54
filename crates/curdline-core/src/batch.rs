use serde::{Serialize, Deserialize};

use crate::anomaly::AnomalyRecord;
use crate::fixed::Fixed64;
use crate::id::BatchId;

/// A batch of material moving through the line.
///
/// Exactly one process or queue owns a batch at any instant: a `put`
/// moves the value into the store, a `get` moves it out. `Batch` is
/// deliberately not `Clone` so the type system enforces single
/// ownership along the transfer path.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Unconverted milk, litres.
    pub milk_l: Fixed64,
    /// Free whey, litres.
    pub whey_l: Fixed64,
    /// Curd, litres.
    pub curd_l: Fixed64,
    /// Solid mass, kilograms (cheddaring onward).
    pub mass_kg: Fixed64,
    pub temperature_c: Fixed64,
    pub ph: Fixed64,
    /// Moisture content, percent.
    pub moisture_pct: Fixed64,
    /// Applied salt, kilograms.
    pub salt_kg: Fixed64,
    /// Discrete sub-units: curd particles, milled slices, or pressed
    /// blocks, depending on where the batch is in the line.
    pub units: u32,
    /// Every anomaly this batch suffered, in injection order.
    pub anomalies: Vec<AnomalyRecord>,
}

impl Batch {
    /// Fresh raw-milk intake at ambient temperature.
    pub fn milk(id: BatchId, litres: Fixed64, temperature_c: Fixed64, ph: Fixed64) -> Self {
        Self {
            id,
            milk_l: litres,
            whey_l: Fixed64::ZERO,
            curd_l: Fixed64::ZERO,
            mass_kg: Fixed64::ZERO,
            temperature_c,
            ph,
            moisture_pct: Fixed64::ZERO,
            salt_kg: Fixed64::ZERO,
            units: 0,
            anomalies: Vec::new(),
        }
    }

    /// True when the batch carries no material at all. Stages guard on
    /// this so empty batches pass through without division by zero.
    pub fn is_empty(&self) -> bool {
        self.milk_l == Fixed64::ZERO
            && self.whey_l == Fixed64::ZERO
            && self.curd_l == Fixed64::ZERO
            && self.mass_kg == Fixed64::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;

    #[test]
    fn milk_batch_starts_with_only_milk() {
        let b = Batch::milk(
            BatchId(1),
            f64_to_fixed64(1000.0),
            f64_to_fixed64(4.0),
            f64_to_fixed64(6.7),
        );
        assert_eq!(b.milk_l, f64_to_fixed64(1000.0));
        assert_eq!(b.whey_l, Fixed64::ZERO);
        assert_eq!(b.curd_l, Fixed64::ZERO);
        assert!(b.anomalies.is_empty());
        assert!(!b.is_empty());
    }

    #[test]
    fn zero_volume_batch_is_empty() {
        let b = Batch::milk(
            BatchId(2),
            Fixed64::ZERO,
            f64_to_fixed64(4.0),
            f64_to_fixed64(6.7),
        );
        assert!(b.is_empty());
    }
}
