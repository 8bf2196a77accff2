//! Evaporation law.
//!
//! `strength(t) = strength0 * rate ^ ((t - last_updated_at) / unit)`
//!
//! Decay is evaluated lazily whenever a concept is read or reinforced; no
//! background sweep ever rewrites stored strengths.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::EnvironmentConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayLaw {
    rate: f64,
    unit: Duration,
}

impl DecayLaw {
    /// `rate` is the fraction retained per `unit` of elapsed time.
    pub fn new(rate: f64, unit: Duration) -> Self {
        Self { rate, unit }
    }

    pub fn from_config(config: &EnvironmentConfig) -> Self {
        Self::new(config.decay_rate, config.decay_unit())
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    /// Elapsed decay units between two instants. Negative spans count as zero.
    pub fn units_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        let unit = self.unit.as_secs_f64();
        if unit <= 0.0 {
            return 0.0;
        }
        match (to - from).to_std() {
            Ok(elapsed) => elapsed.as_secs_f64() / unit,
            Err(_) => 0.0,
        }
    }

    /// Strength at `now` of a concept last written as `(strength, last_updated_at)`.
    /// Never negative.
    pub fn apply(&self, strength: f64, last_updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if !(strength > 0.0) {
            return 0.0;
        }
        let units = self.units_between(last_updated_at, now);
        let decayed = strength * self.rate.powf(units);
        if decayed.is_finite() && decayed > 0.0 {
            decayed
        } else {
            0.0
        }
    }
}
