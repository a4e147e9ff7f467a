//! Adaptive request pacing tied to the wall clock.
//!
//! Upstream anti-crawling defenses key on mechanical request cadences, so
//! every fetch dispatch waits a randomized interval first. The bounds of
//! that interval follow the time of day in three bands: slow during
//! business hours, moderate in the evening, fast overnight.
//!
//! The governor also owns the retry backoff schedule. The base delay is
//! sampled once per article and reused across its retries; only the backoff
//! term grows, so the effective wait strictly increases attempt over attempt.

use crate::config::{DelayBand, DelaySchedule};
use chrono::{DateTime, Local, Timelike};
use rand::{Rng, rng};
use std::time::Duration;
use tracing::debug;

const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(5);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Samples per-dispatch delays according to a [`DelaySchedule`].
#[derive(Debug, Clone)]
pub struct RateGovernor {
    schedule: DelaySchedule,
}

impl RateGovernor {
    pub fn new(schedule: DelaySchedule) -> Self {
        Self { schedule }
    }

    /// Sample the base delay for one article dispatch.
    ///
    /// Called exactly once per article, before its first attempt; retries
    /// reuse the sampled value and stack [`retry_backoff`] on top.
    pub fn delay_for(&self, now: DateTime<Local>) -> Duration {
        self.sample(now.hour(), &mut rng())
    }

    /// Which band a wall-clock hour falls into.
    pub fn band_for(&self, hour: u32) -> (&'static str, DelayBand) {
        let s = &self.schedule;
        if hour >= s.daytime_start_hour && hour < s.evening_start_hour {
            ("daytime", s.daytime)
        } else if hour >= s.evening_start_hour {
            ("evening", s.evening)
        } else {
            ("overnight", s.overnight)
        }
    }

    fn sample<R: Rng + ?Sized>(&self, hour: u32, rng: &mut R) -> Duration {
        let (band, bounds) = self.band_for(hour);
        let secs = if bounds.min_secs < bounds.max_secs {
            rng.random_range(bounds.min_secs..=bounds.max_secs)
        } else {
            bounds.min_secs
        };
        let delay = Duration::from_secs_f64(secs);
        debug!(
            hour,
            band,
            delay_ms = delay.as_millis() as u64,
            "Sampled dispatch delay"
        );
        delay
    }
}

/// Additional wait before retry `attempt` (1-based attempt numbers).
///
/// The first attempt carries no backoff; each retry doubles the previous
/// wait starting from 5 seconds, capped at 60.
pub fn retry_backoff(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let exponent = (attempt - 2).min(30);
    RETRY_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(RETRY_BACKOFF_CAP)
}
