use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hash::hash64;

const HLL_SEED: u64 = 0xadc8_3b19;
pub const DEFAULT_PRECISION: u8 = 14;

/// HyperLogLog over `m = 2^precision` one-byte registers. Equal
/// precisions merge by elementwise max, which is what lets the
/// processor keep one sketch per minute bucket and union them at
/// query time.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new(precision: u8) -> Result<Self, Error> {
        if !(4..=18).contains(&precision) {
            return Err(Error::InvalidConfig(
                "HyperLogLog precision must be between 4 and 18",
            ));
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    pub fn add(&mut self, value: &str) {
        self.add_hash(hash64(value.as_bytes(), HLL_SEED));
    }

    pub fn add_hash(&mut self, hash: u64) {
        let idx = (hash >> (64 - self.precision)) as usize;
        let w = hash << self.precision;
        let max_rank = 64 - self.precision;
        let rank = (w.leading_zeros() as u8 + 1).min(max_rank);
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Elementwise max. Only sketches of equal precision are unionable.
    pub fn merge(&mut self, other: &Self) -> Result<(), Error> {
        if other.precision != self.precision {
            return Err(Error::MergeMismatch {
                left: self.precision,
                right: other.precision,
            });
        }
        for (reg, &o) in self.registers.iter_mut().zip(other.registers.iter()) {
            if o > *reg {
                *reg = o;
            }
        }
        Ok(())
    }

    pub fn cardinality(&self) -> u64 {
        let m = self.registers.len() as f64;
        let mut sum = 0.0;
        let mut zeros = 0u64;
        for &reg in &self.registers {
            sum += 2.0_f64.powi(-(reg as i32));
            if reg == 0 {
                zeros += 1;
            }
        }

        let mut estimate = Self::alpha(self.registers.len()) * m * m / sum;

        if estimate <= 5.0 * m {
            // Small-range correction: linear counting over empty registers.
            if zeros != 0 {
                estimate = m * (m / zeros as f64).ln();
            }
        } else if estimate > (1u64 << 32) as f64 / 30.0 {
            let two32 = (1u64 << 32) as f64;
            estimate = -two32 * (1.0 - estimate / two32).ln();
        }

        if estimate < 0.0 {
            estimate = 0.0;
        }
        (estimate + 0.5) as u64
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    fn alpha(m: usize) -> f64 {
        match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m as f64),
        }
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION).expect("default precision is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sketch_is_zero() {
        let hll = HyperLogLog::default();
        assert_eq!(hll.cardinality(), 0);
    }

    #[test]
    fn test_duplicates_do_not_inflate() {
        let mut hll = HyperLogLog::new(12).unwrap();
        for _ in 0..10_000 {
            hll.add("the-same-user");
        }
        let estimate = hll.cardinality();
        assert!(estimate >= 1 && estimate <= 2, "estimate = {}", estimate);
    }

    #[test]
    fn test_add_hash_matches_add() {
        let mut by_value = HyperLogLog::new(12).unwrap();
        let mut by_hash = HyperLogLog::new(12).unwrap();
        for i in 0..200 {
            let user = format!("user-{}", i);
            by_value.add(&user);
            by_hash.add_hash(crate::hash::hash64(user.as_bytes(), HLL_SEED));
        }
        assert_eq!(by_value.cardinality(), by_hash.cardinality());
    }

    #[test]
    fn test_small_range_accuracy() {
        let mut hll = HyperLogLog::default();
        for i in 0..100 {
            hll.add(&format!("user-{}", i));
        }
        let estimate = hll.cardinality() as i64;
        assert!((estimate - 100).abs() <= 5, "estimate = {}", estimate);
    }

    #[test]
    fn test_merge_unions() {
        let mut a = HyperLogLog::default();
        let mut b = HyperLogLog::default();
        for i in 0..500 {
            a.add(&format!("user-{}", i));
            b.add(&format!("user-{}", i + 250));
        }
        a.merge(&b).unwrap();
        let estimate = a.cardinality() as i64;
        assert!((estimate - 750).abs() < 75, "estimate = {}", estimate);
    }

    #[test]
    fn test_merge_precision_mismatch() {
        let mut a = HyperLogLog::new(12).unwrap();
        let b = HyperLogLog::new(14).unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(Error::MergeMismatch { left: 12, right: 14 })
        ));
    }

    #[test]
    fn test_precision_bounds() {
        assert!(HyperLogLog::new(3).is_err());
        assert!(HyperLogLog::new(19).is_err());
        assert!(HyperLogLog::new(4).is_ok());
        assert!(HyperLogLog::new(18).is_ok());
    }
}
