//! Drivers that run a [`Poller`] to completion.
//!
//! The async driver sleeps on the tokio timer (so `tokio::time::pause` makes
//! tests deterministic); the blocking driver parks the calling thread.

use std::future::Future;

use thiserror::Error;
use tracing::trace;

use crate::backoff::{BackoffPolicy, PollOutcome, PollStep, Poller};

/// Why a poll run ended without reaching `Ready`.
#[derive(Debug, Error)]
pub enum PollError<E> {
	/// The shared deadline passed; carries the last `NotReady` detail.
	#[error("not ready before deadline after {attempts} attempts (last: {})", last_detail.as_deref().unwrap_or("no detail"))]
	TimedOut { last_detail: Option<String>, attempts: u32 },
	/// The query itself failed in a way that retrying will not fix.
	#[error("readiness query failed: {0}")]
	Query(E),
}

/// Polls `query` until it reports [`PollOutcome::Ready`].
///
/// Returns the number of queries issued. The first query always runs, even if
/// `deadline` has already passed.
pub async fn poll_until_ready<F, Fut, E>(policy: BackoffPolicy, deadline: Option<tokio::time::Instant>, mut query: F) -> Result<u32, PollError<E>>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<PollOutcome, E>>,
{
	let mut poller = Poller::new(policy, deadline);
	loop {
		let outcome = query().await.map_err(PollError::Query)?;
		match poller.record(outcome) {
			PollStep::Ready => return Ok(poller.attempts()),
			PollStep::Sleep(delay) => {
				trace!(target = "sbx.poll", attempt = poller.attempts(), delay_ms = delay.as_millis() as u64, detail = ?poller.last_detail(), "not ready; backing off");
				tokio::time::sleep(delay).await;
			}
		}
		if poller.deadline_passed(tokio::time::Instant::now()) {
			return Err(timed_out(poller));
		}
	}
}

/// Blocking twin of [`poll_until_ready`] for the threaded session model.
pub fn poll_until_ready_blocking<F, E>(policy: BackoffPolicy, deadline: Option<std::time::Instant>, mut query: F) -> Result<u32, PollError<E>>
where
	F: FnMut() -> Result<PollOutcome, E>,
{
	let mut poller = Poller::new(policy, deadline);
	loop {
		let outcome = query().map_err(PollError::Query)?;
		match poller.record(outcome) {
			PollStep::Ready => return Ok(poller.attempts()),
			PollStep::Sleep(delay) => {
				trace!(target = "sbx.poll", attempt = poller.attempts(), delay_ms = delay.as_millis() as u64, detail = ?poller.last_detail(), "not ready; backing off");
				std::thread::sleep(delay);
			}
		}
		if poller.deadline_passed(std::time::Instant::now()) {
			return Err(timed_out(poller));
		}
	}
}

fn timed_out<I: Copy + PartialOrd, E>(poller: Poller<I>) -> PollError<E> {
	let attempts = poller.attempts();
	PollError::TimedOut {
		last_detail: poller.into_last_detail(),
		attempts,
	}
}
