//! Deterministic PRNG for simulation use (sensor noise, anomaly rolls).
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, excellent
//! statistical properties, and trivially serializable. Each stage gets
//! its own stream split off the master seed so adding a stage never
//! perturbs the draws of the others.

use crate::fixed::Fixed64;

/// SplitMix64 pseudo-random number generator.
///
/// Deterministic across platforms — a run is fully described by its seed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Derive an independent stream for a child component.
    ///
    /// The child seed mixes this stream's next output with the salt, so
    /// two children split from the same parent with different salts get
    /// unrelated sequences.
    pub fn split(&mut self, salt: u64) -> SimRng {
        let s = self.next_u64() ^ salt.wrapping_mul(0xA24B_AED4_963E_E407);
        SimRng::new(s)
    }

    /// Returns `true` with the given probability (Fixed64 in [0, 1]).
    ///
    /// - probability <= 0 always returns false
    /// - probability >= 1 always returns true
    pub fn chance(&mut self, probability: Fixed64) -> bool {
        if probability <= Fixed64::ZERO {
            return false;
        }
        if probability >= Fixed64::from_num(1) {
            return true;
        }
        // Fixed64 is Q32.32 (I32F32). For p in (0,1), the raw bits hold
        // the fractional part in the lower 32 bits (integer part = 0).
        // Generate a uniform u32 from the PRNG and compare against the
        // lower 32 bits of the fixed-point representation.
        let r = self.next_u64();
        let upper = (r >> 32) as u32;
        let raw = probability.to_bits() as u64;
        (upper as u64) < raw
    }

    /// Uniform draw in [lo, hi). Returns `lo` when the range is empty.
    pub fn uniform(&mut self, lo: Fixed64, hi: Fixed64) -> Fixed64 {
        if hi <= lo {
            return lo;
        }
        let span = hi - lo;
        // Uniform fraction in [0, 1) from the upper 32 bits.
        let frac = Fixed64::from_bits((self.next_u64() >> 32) as i64);
        lo + span * frac
    }

    /// Pick an index from a weighted table. Weights need not sum to one;
    /// zero-weight entries are never chosen. Returns `None` for an empty
    /// table or all-zero weights.
    pub fn pick_weighted(&mut self, weights: &[Fixed64]) -> Option<usize> {
        let total: Fixed64 = weights
            .iter()
            .filter(|w| **w > Fixed64::ZERO)
            .copied()
            .sum();
        if total <= Fixed64::ZERO {
            return None;
        }
        let mut mark = self.uniform(Fixed64::ZERO, total);
        for (i, w) in weights.iter().enumerate() {
            if *w <= Fixed64::ZERO {
                continue;
            }
            if mark < *w {
                return Some(i);
            }
            mark -= *w;
        }
        // Rounding at the top of the range falls to the last nonzero entry.
        weights.iter().rposition(|w| *w > Fixed64::ZERO)
    }

    /// Get the internal state (for hashing/serialization).
    pub fn state(&self) -> u64 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;

    #[test]
    fn deterministic() {
        let mut a = SimRng::new(42);
        let mut b = SimRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_differ() {
        let mut a = SimRng::new(1);
        let mut b = SimRng::new(2);
        // Extremely unlikely to match.
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn split_streams_are_independent() {
        let mut master = SimRng::new(42);
        let mut a = master.split(0);
        let mut b = master.split(1);
        assert_ne!(a.next_u64(), b.next_u64());

        // Same seed, same salts: identical streams.
        let mut master2 = SimRng::new(42);
        let mut a2 = master2.split(0);
        let mut check = SimRng::new(42);
        let mut a_again = check.split(0);
        for _ in 0..20 {
            assert_eq!(a2.next_u64(), a_again.next_u64());
        }
    }

    #[test]
    fn chance_zero_always_false() {
        let mut rng = SimRng::new(999);
        for _ in 0..100 {
            assert!(!rng.chance(Fixed64::ZERO));
        }
    }

    #[test]
    fn chance_one_always_true() {
        let mut rng = SimRng::new(999);
        for _ in 0..100 {
            assert!(rng.chance(Fixed64::from_num(1)));
        }
    }

    #[test]
    fn chance_half_roughly_balanced() {
        let mut rng = SimRng::new(12345);
        let trials = 10_000;
        let mut hits = 0u32;
        let half = f64_to_fixed64(0.5);
        for _ in 0..trials {
            if rng.chance(half) {
                hits += 1;
            }
        }
        assert!((4000..=6000).contains(&hits), "expected ~5000, got {hits}");
    }

    #[test]
    fn uniform_stays_in_range() {
        let mut rng = SimRng::new(7);
        let lo = f64_to_fixed64(70.0);
        let hi = f64_to_fixed64(74.0);
        for _ in 0..1000 {
            let v = rng.uniform(lo, hi);
            assert!(v >= lo && v < hi, "out of range: {v}");
        }
    }

    #[test]
    fn uniform_empty_range_returns_lo() {
        let mut rng = SimRng::new(7);
        let lo = f64_to_fixed64(5.0);
        assert_eq!(rng.uniform(lo, lo), lo);
    }

    #[test]
    fn pick_weighted_skips_zero_entries() {
        let mut rng = SimRng::new(3);
        let weights = [
            Fixed64::ZERO,
            f64_to_fixed64(1.0),
            Fixed64::ZERO,
        ];
        for _ in 0..100 {
            assert_eq!(rng.pick_weighted(&weights), Some(1));
        }
    }

    #[test]
    fn pick_weighted_empty_or_zero_is_none() {
        let mut rng = SimRng::new(3);
        assert_eq!(rng.pick_weighted(&[]), None);
        assert_eq!(rng.pick_weighted(&[Fixed64::ZERO]), None);
    }

    #[test]
    fn pick_weighted_respects_proportions() {
        let mut rng = SimRng::new(2024);
        let weights = [f64_to_fixed64(0.9), f64_to_fixed64(0.1)];
        let mut first = 0u32;
        for _ in 0..10_000 {
            if rng.pick_weighted(&weights) == Some(0) {
                first += 1;
            }
        }
        // Expect ~9000 with generous tolerance.
        assert!((8500..=9500).contains(&first), "expected ~9000, got {first}");
    }

    #[test]
    fn serialization_round_trip() {
        let mut rng = SimRng::new(42);
        for _ in 0..50 {
            rng.next_u64();
        }

        let json = serde_json::to_string(&rng).unwrap();
        let restored: SimRng = serde_json::from_str(&json).unwrap();
        assert_eq!(rng, restored);

        let mut rng2 = restored;
        for _ in 0..10 {
            assert_eq!(rng.next_u64(), rng2.next_u64());
        }
    }
}
