use std::time::Duration;

/// Exponentially smoothed throughput: each tick keeps three quarters of the previous speed
/// and adds a quarter of the latest rate.
#[derive(Debug, Default)]
pub(crate) struct SpeedEstimator {
	speed: u64,
	last_processed: u64,
}

impl SpeedEstimator {
	/// Feeds the processed size observed after `elapsed`, returns the new speed in units per second.
	pub(crate) fn update(&mut self, processed: u64, elapsed: Duration) -> u64 {
		let delta = processed.saturating_sub(self.last_processed);
		self.last_processed = processed;

		let elapsed_ms = elapsed.as_millis().max(1);
		let rate = u64::try_from(u128::from(delta) * 1000 / elapsed_ms).unwrap_or(u64::MAX);

		self.speed = self.speed.saturating_mul(3) / 4 + rate / 4;
		self.speed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SECOND: Duration = Duration::from_secs(1);

	#[test]
	fn converges_to_steady_rate() {
		let mut estimator = SpeedEstimator::default();

		assert_eq!(estimator.update(400, SECOND), 100);
		assert_eq!(estimator.update(800, SECOND), 175);

		let mut processed = 800;
		let mut speed = 0;
		for _ in 0..50 {
			processed += 400;
			speed = estimator.update(processed, SECOND);
		}
		assert!((395..=400).contains(&speed));
	}

	#[test]
	fn decays_when_idle() {
		let mut estimator = SpeedEstimator::default();
		estimator.update(1000, SECOND);

		assert_eq!(estimator.update(1000, SECOND), 187);
		assert_eq!(estimator.update(1000, SECOND), 140);
	}

	#[test]
	fn scales_to_per_second() {
		let mut estimator = SpeedEstimator::default();

		assert_eq!(estimator.update(100, Duration::from_millis(250)), 100);
	}
}
