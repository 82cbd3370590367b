//! Shared exponential-backoff schedule for the client engine and the
//! agent's reconnect loop.
//!
//! Both sides retry against the same broker under the same tolerance for
//! a bridged reload, so they share one schedule rather than each picking
//! their own constants.

use std::time::Duration;

/// `delay(attempt) = min(initial * 2^attempt, max)`, with a ceiling on
/// total elapsed wall time across all attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
	pub initial: Duration,
	pub max: Duration,
	pub max_elapsed: Duration,
}

impl BackoffSchedule {
	/// The schedule named in the protocol contract: 500ms doubling, capped
	/// at 8s per step, 45s total.
	pub const DEFAULT: BackoffSchedule = BackoffSchedule {
		initial: Duration::from_millis(500),
		max: Duration::from_millis(8_000),
		max_elapsed: Duration::from_millis(45_000),
	};

	/// Delay to sleep before attempt number `attempt` (0-indexed: the
	/// delay before the *first* retry, i.e. after attempt 0 has failed).
	#[must_use]
	pub fn delay(&self, attempt: u32) -> Duration {
		let scaled = self.initial.as_millis().saturating_mul(1u128 << attempt.min(32));
		let capped = scaled.min(self.max.as_millis());
		Duration::from_millis(capped as u64)
	}

	/// An iterator-like cursor tracking elapsed time against `max_elapsed`.
	#[must_use]
	pub fn cursor(&self) -> BackoffCursor {
		BackoffCursor {
			schedule: *self,
			attempt: 0,
			elapsed: Duration::ZERO,
		}
	}
}

/// Tracks in-progress retry state: how many attempts have been made and
/// how much wall time has been spent sleeping so far.
#[derive(Debug, Clone, Copy)]
pub struct BackoffCursor {
	schedule: BackoffSchedule,
	attempt: u32,
	elapsed: Duration,
}

impl BackoffCursor {
	/// Returns the delay for the next retry, or `None` if taking it would
	/// exceed the schedule's total budget.
	pub fn next_delay(&mut self) -> Option<Duration> {
		let delay = self.schedule.delay(self.attempt);
		if self.elapsed + delay > self.schedule.max_elapsed {
			return None;
		}
		self.attempt += 1;
		self.elapsed += delay;
		Some(delay)
	}
}
