//! Exponential per-day score decay

use serde::{Deserialize, Serialize};

use crate::error::Error;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct TimeDecay {
    factor: f64,
}

impl TimeDecay {
    /// `factor` is the per-day attenuation base, in `(0, 1]`. A factor
    /// of 1.0 disables decay.
    pub fn new(factor: f64) -> Result<Self, Error> {
        if factor <= 0.0 || factor > 1.0 {
            return Err(Error::InvalidConfig("decay factor must be in (0, 1]"));
        }
        Ok(Self { factor })
    }

    /// Decay `score` from `last_update` to `now` (both in seconds).
    /// Time never runs backwards here: `now <= last_update` leaves the
    /// score untouched.
    pub fn apply(&self, score: f64, last_update: i64, now: i64) -> f64 {
        if now <= last_update {
            return score;
        }
        let days = (now - last_update) as f64 / SECONDS_PER_DAY;
        score * self.factor.powf(days)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for TimeDecay {
    fn default() -> Self {
        Self { factor: 0.95 }
    }
}
