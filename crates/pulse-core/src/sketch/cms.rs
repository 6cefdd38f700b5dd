//! Count-Min Sketch for memory-efficient channel frequency estimation
//!
//! Fixed-size table estimating per-key counts in a stream with a small
//! one-sided overestimation probability. Counters never decrease, so
//! `estimate(k) >= true_count(k)` always holds.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hash::hash64;

const ROW_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    seed: u64,
    table: Vec<u64>,
}

impl CountMinSketch {
    /// `width` must be a nonzero power of two, `depth` at least one.
    pub fn new(width: usize, depth: usize, seed: u64) -> Result<Self, Error> {
        if width == 0 || !width.is_power_of_two() {
            return Err(Error::InvalidConfig("CMS width must be a power of two"));
        }
        if depth == 0 {
            return Err(Error::InvalidConfig("CMS depth must be greater than zero"));
        }
        Ok(Self {
            width,
            depth,
            seed,
            table: vec![0; width * depth],
        })
    }

    pub fn increment(&mut self, key: &str, count: u64) {
        for row in 0..self.depth {
            let idx = self.cell(key, row);
            self.table[idx] = self.table[idx].saturating_add(count);
        }
    }

    pub fn estimate(&self, key: &str) -> u64 {
        let mut min = u64::MAX;
        for row in 0..self.depth {
            min = min.min(self.table[self.cell(key, row)]);
        }
        // All rows saturated has never been observed in practice; treat
        // it as an empty sketch rather than returning the sentinel.
        if min == u64::MAX { 0 } else { min }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn cell(&self, key: &str, row: usize) -> usize {
        let salt = self.seed.wrapping_add((row as u64).wrapping_mul(ROW_SALT));
        let h = hash64(key.as_bytes(), salt);
        row * self.width + (h as usize & (self.width - 1))
    }
}

impl Default for CountMinSketch {
    fn default() -> Self {
        Self::new(2048, 4, 12345).expect("default CMS dimensions are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cms_basic() {
        let mut cms = CountMinSketch::new(1024, 4, 99).unwrap();
        cms.increment("general", 1);
        cms.increment("general", 1);
        cms.increment("random", 1);

        assert!(cms.estimate("general") >= 2);
        assert!(cms.estimate("random") >= 1);
        assert_eq!(cms.estimate("never-seen"), 0);
    }

    #[test]
    fn test_cms_never_underestimates() {
        // Tiny width to force collisions; the estimate may only go up.
        let mut cms = CountMinSketch::new(2, 2, 7).unwrap();
        for i in 0..100 {
            cms.increment(&format!("ch-{}", i), 1);
        }
        assert!(cms.estimate("ch-1") >= 1);
    }

    #[test]
    fn test_cms_bulk_increment() {
        let mut cms = CountMinSketch::default();
        cms.increment("general", 500);
        assert!(cms.estimate("general") >= 500);
    }

    #[test]
    fn test_cms_default_dimensions() {
        let cms = CountMinSketch::default();
        assert_eq!(cms.width(), 2048);
        assert_eq!(cms.depth(), 4);
    }

    #[test]
    fn test_cms_rejects_bad_dimensions() {
        assert!(matches!(
            CountMinSketch::new(1000, 4, 0),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            CountMinSketch::new(1024, 0, 0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
