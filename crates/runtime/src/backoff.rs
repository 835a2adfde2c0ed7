//! Exponential backoff with uniform jitter.
//!
//! [`Poller`] holds the whole retry algorithm as plain state so that the
//! tokio driver and the thread driver in [`crate::poll`] only differ in how
//! they sleep and read the clock.

use std::time::Duration;

use rand::Rng;

/// Retry delay schedule: doubles from `base_delay` up to `max_delay`, each
/// sleep perturbed by up to `±jitter_fraction` of its nominal value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub jitter_fraction: f64,
}

impl BackoffPolicy {
	/// Readiness polling for the tokio session model.
	pub const ASYNC_READINESS: Self = Self::new(Duration::from_millis(500), Duration::from_secs(2));

	/// Readiness polling for the threaded session model. Caps higher since
	/// each poll occupies a whole thread.
	pub const THREADED_READINESS: Self = Self::new(Duration::from_millis(500), Duration::from_secs(8));

	/// Jitter applied when none is specified.
	pub const DEFAULT_JITTER_FRACTION: f64 = 0.2;

	pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
		Self {
			base_delay,
			max_delay,
			jitter_fraction: Self::DEFAULT_JITTER_FRACTION,
		}
	}

	pub const fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
		self.jitter_fraction = jitter_fraction;
		self
	}

	/// First nominal delay of the schedule.
	pub fn initial_delay(&self) -> Duration {
		self.base_delay.min(self.max_delay)
	}

	/// Nominal delay that follows `current`.
	pub fn next_nominal(&self, current: Duration) -> Duration {
		current.saturating_mul(2).min(self.max_delay)
	}

	/// Infinite sequence of nominal (un-jittered) delays.
	pub fn nominal_delays(&self) -> impl Iterator<Item = Duration> + '_ {
		std::iter::successors(Some(self.initial_delay()), move |current| Some(self.next_nominal(*current)))
	}

	/// Inclusive range a jittered `nominal` delay falls in.
	pub fn jitter_bounds(&self, nominal: Duration) -> (Duration, Duration) {
		let fraction = self.clamped_fraction();
		(nominal.mul_f64(1.0 - fraction), nominal.mul_f64(1.0 + fraction))
	}

	/// Applies jitter to `nominal` using the thread-local RNG.
	pub fn jittered(&self, nominal: Duration) -> Duration {
		self.jittered_with(nominal, &mut rand::thread_rng())
	}

	/// Applies jitter to `nominal` using `rng`.
	pub fn jittered_with<R: Rng + ?Sized>(&self, nominal: Duration, rng: &mut R) -> Duration {
		let fraction = self.clamped_fraction();
		if fraction == 0.0 || nominal.is_zero() {
			return nominal;
		}
		nominal.mul_f64(rng.gen_range((1.0 - fraction)..=(1.0 + fraction)))
	}

	fn clamped_fraction(&self) -> f64 {
		if self.jitter_fraction.is_finite() {
			self.jitter_fraction.clamp(0.0, 1.0)
		} else {
			0.0
		}
	}
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self::ASYNC_READINESS
	}
}

/// Result of one readiness query. "Not ready yet" is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
	Ready,
	NotReady(String),
}

impl PollOutcome {
	pub fn not_ready(detail: impl Into<String>) -> Self {
		Self::NotReady(detail.into())
	}

	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready)
	}
}

/// What a driver must do after feeding an outcome to the [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
	Ready,
	Sleep(Duration),
}

/// Retry state for one `poll until ready` run.
///
/// Drivers loop: query, [`Poller::record`], sleep, [`Poller::deadline_passed`].
/// The deadline is absolute so several pollers can share one budget.
#[derive(Debug, Clone)]
pub struct Poller<I = std::time::Instant> {
	policy: BackoffPolicy,
	deadline: Option<I>,
	current: Duration,
	attempts: u32,
	last_detail: Option<String>,
}

impl<I: Copy + PartialOrd> Poller<I> {
	pub fn new(policy: BackoffPolicy, deadline: Option<I>) -> Self {
		Self {
			current: policy.initial_delay(),
			policy,
			deadline,
			attempts: 0,
			last_detail: None,
		}
	}

	/// Records a query outcome and returns the next step.
	///
	/// On `NotReady` the returned sleep is the jittered current delay; the
	/// nominal delay then doubles up to the policy cap.
	pub fn record(&mut self, outcome: PollOutcome) -> PollStep {
		self.attempts += 1;
		match outcome {
			PollOutcome::Ready => PollStep::Ready,
			PollOutcome::NotReady(detail) => {
				self.last_detail = Some(detail);
				let delay = self.policy.jittered(self.current);
				self.current = self.policy.next_nominal(self.current);
				PollStep::Sleep(delay)
			}
		}
	}

	/// `true` once `now` is strictly past the deadline.
	pub fn deadline_passed(&self, now: I) -> bool {
		self.deadline.is_some_and(|deadline| now > deadline)
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	/// Nominal delay the next `NotReady` will sleep (before jitter).
	pub fn current_delay(&self) -> Duration {
		self.current
	}

	pub fn last_detail(&self) -> Option<&str> {
		self.last_detail.as_deref()
	}

	pub fn into_last_detail(self) -> Option<String> {
		self.last_detail
	}
}

#[cfg(test)]
mod tests {
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	use super::*;

	#[test]
	fn nominal_delays_double_then_cap() {
		let policy = BackoffPolicy::ASYNC_READINESS;
		let delays: Vec<_> = policy.nominal_delays().take(5).collect();
		assert_eq!(
			delays,
			vec![
				Duration::from_millis(500),
				Duration::from_secs(1),
				Duration::from_secs(2),
				Duration::from_secs(2),
				Duration::from_secs(2),
			]
		);

		let threaded: Vec<_> = BackoffPolicy::THREADED_READINESS.nominal_delays().take(6).collect();
		assert_eq!(threaded[4], Duration::from_secs(8));
		assert_eq!(threaded[5], Duration::from_secs(8));
	}

	#[test]
	fn nominal_delays_are_non_decreasing_for_many_shapes() {
		for base_ms in [1u64, 7, 100, 500, 3_000] {
			for max_ms in [1u64, 50, 2_000, 8_000, 60_000] {
				let policy = BackoffPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms));
				let delays: Vec<_> = policy.nominal_delays().take(40).collect();
				assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{policy:?}");
				assert!(delays.iter().all(|d| *d <= policy.max_delay), "{policy:?}");
				assert_eq!(*delays.last().unwrap(), policy.max_delay, "{policy:?}");
			}
		}
	}

	#[test]
	fn jitter_stays_within_fraction() {
		let mut rng = StdRng::seed_from_u64(7);
		for fraction in [0.0, 0.1, 0.2, 0.5, 1.0] {
			let policy = BackoffPolicy::ASYNC_READINESS.with_jitter_fraction(fraction);
			for nominal in policy.nominal_delays().take(8) {
				let (low, high) = policy.jitter_bounds(nominal);
				for _ in 0..200 {
					let delay = policy.jittered_with(nominal, &mut rng);
					assert!(delay >= low && delay <= high, "{delay:?} outside {low:?}..={high:?}");
				}
			}
		}
	}

	#[test]
	fn zero_fraction_disables_jitter() {
		let policy = BackoffPolicy::ASYNC_READINESS.with_jitter_fraction(0.0);
		assert_eq!(policy.jittered(Duration::from_millis(750)), Duration::from_millis(750));

		let nan = BackoffPolicy::ASYNC_READINESS.with_jitter_fraction(f64::NAN);
		assert_eq!(nan.jittered(Duration::from_millis(750)), Duration::from_millis(750));
	}

	#[test]
	fn poller_advances_and_remembers_detail() {
		let policy = BackoffPolicy::ASYNC_READINESS.with_jitter_fraction(0.0);
		let mut poller: Poller = Poller::new(policy, None);

		assert_eq!(poller.record(PollOutcome::not_ready("pending")), PollStep::Sleep(Duration::from_millis(500)));
		assert_eq!(poller.record(PollOutcome::not_ready("queued")), PollStep::Sleep(Duration::from_secs(1)));
		assert_eq!(poller.last_detail(), Some("queued"));
		assert_eq!(poller.record(PollOutcome::Ready), PollStep::Ready);
		assert_eq!(poller.attempts(), 3);
		assert_eq!(poller.current_delay(), Duration::from_secs(2));
	}

	#[test]
	fn deadline_is_strictly_exceeded() {
		let start = std::time::Instant::now();
		let deadline = start + Duration::from_secs(1);
		let poller = Poller::new(BackoffPolicy::default(), Some(deadline));
		assert!(!poller.deadline_passed(start));
		assert!(!poller.deadline_passed(deadline));
		assert!(poller.deadline_passed(deadline + Duration::from_millis(1)));

		let unbounded: Poller = Poller::new(BackoffPolicy::default(), None);
		assert!(!unbounded.deadline_passed(start + Duration::from_secs(86_400)));
	}
}
