//! Deterministic PRNG for simulation use (arrivals, service times, routing).
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, excellent
//! statistical properties, and trivially serializable. Every replication owns
//! its own generator, seeded from the run seed and the replication index.

/// SplitMix64 pseudo-random number generator.
///
/// Deterministic across platforms, so a fixed seed reproduces a replication
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Seed for replication `index` of a run started with `seed`.
    ///
    /// Mixes both values through one SplitMix64 round so that neighbouring
    /// replications do not share overlapping streams.
    pub fn replication_seed(seed: u64, index: u64) -> u64 {
        let mut mixer = SimRng::new(seed ^ index.wrapping_mul(0xD1B5_4A32_D192_ED03));
        mixer.next_u64()
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform draw in `[0, 1)` with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform draw in `(0, 1]`; safe to pass to `ln`.
    pub fn next_open_f64(&mut self) -> f64 {
        1.0 - self.next_f64()
    }

    /// Uniform integer in `[0, n)`. Returns 0 when `n == 0`.
    pub fn below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        // Lemire's multiply-shift reduction; the bias is below 2^-64 * n.
        ((self.next_u64() as u128 * n as u128) >> 64) as u64
    }

    /// Returns `true` with the given probability.
    ///
    /// - probability <= 0 always returns false
    /// - probability >= 1 always returns true
    pub fn chance(&mut self, probability: f64) -> bool {
        if probability.is_nan() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.next_f64() < probability
    }

    /// Get the internal state (for hashing/serialization).
    pub fn state(&self) -> u64 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn replication_seeds_are_distinct() {
        let seeds: std::collections::HashSet<u64> =
            (0..64).map(|i| SimRng::replication_seed(7, i)).collect();
        assert_eq!(seeds.len(), 64);
    }

    #[test]
    fn unit_interval_bounds() {
        let mut rng = SimRng::new(5);
        for _ in 0..10_000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
            let y = rng.next_open_f64();
            assert!(y > 0.0 && y <= 1.0);
        }
    }

    #[test]
    fn below_stays_in_range() {
        let mut rng = SimRng::new(77);
        for _ in 0..1000 {
            assert!(rng.below(3) < 3);
        }
        assert_eq!(rng.below(0), 0);
    }

    #[test]
    fn chance_edges() {
        let mut rng = SimRng::new(999);
        for _ in 0..100 {
            assert!(!rng.chance(0.0));
            assert!(rng.chance(1.0));
        }
        assert!(!rng.chance(-1.0));
        assert!(rng.chance(2.0));
        assert!(!rng.chance(f64::NAN));
    }

    #[test]
    fn chance_half_roughly_balanced() {
        let mut rng = SimRng::new(12345);
        let trials = 10_000;
        let hits = (0..trials).filter(|_| rng.chance(0.5)).count();
        // Expect ~5000 +/- 300 (very generous tolerance).
        assert!((4000..=6000).contains(&hits), "expected ~5000, got {hits}");
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

        // Continue sequence -- should match.
        let mut rng2 = restored;
        for _ in 0..10 {
            assert_eq!(rng.next_u64(), rng2.next_u64());
        }
    }
}
