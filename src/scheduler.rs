//! Adaptive sync interval
//!
//! Idle cycles stretch the interval, busy cycles snap it back to the minimum
//! and failures back off. The wait before the next tick also includes how
//! long the last cycle took, capped at the maximum.

use std::time::Duration;

use crate::config::SYNC_INTERVAL_CEILING_S;

/// Growth applied after a cycle that moved nothing
pub const IDLE_GROWTH: f64 = 1.3;

/// Growth applied after a cycle that raised an error
pub const ERROR_BACKOFF: f64 = 1.5;

/// Consecutive failures before automatic cycles pause
pub const MAX_FAILURES_IN_A_ROW: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveInterval {
	current: f64,
	min: f64,
	max: f64,
}

impl AdaptiveInterval {
	/// Bounds in seconds; starts at the minimum
	pub fn new(min: f64, max: f64) -> Self {
		let min = bounded(min);
		let max = bounded(max).max(min);
		AdaptiveInterval { current: min, min, max }
	}

	/// Current interval in seconds
	pub fn seconds(&self) -> f64 {
		self.current
	}

	pub fn on_idle(&mut self) {
		self.current = (self.current * IDLE_GROWTH).min(self.max);
	}

	pub fn on_work(&mut self) {
		self.current = self.min;
	}

	pub fn on_error(&mut self) {
		self.current = (self.current * ERROR_BACKOFF).min(self.max);
	}

	/// How long to rest after a tick that took `elapsed`
	pub fn next_wait(&self, elapsed: Duration) -> Duration {
		let secs = bounded((self.current + elapsed.as_secs_f64()).min(self.max));
		Duration::try_from_secs_f64(secs)
			.unwrap_or_else(|_| Duration::from_secs_f64(SYNC_INTERVAL_CEILING_S))
	}
}

/// Clamp seconds into `0..=SYNC_INTERVAL_CEILING_S`; NaN maps to the ceiling
fn bounded(secs: f64) -> f64 {
	if secs.is_nan() {
		SYNC_INTERVAL_CEILING_S
	} else {
		secs.clamp(0.0, SYNC_INTERVAL_CEILING_S)
	}
}


// vim: ts=4
