//! Background keepalive for a ready session.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::SessionApi;
use crate::error::Error;
use crate::session::SessionIds;

/// Heartbeat cadence for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
	pub interval: Duration,
}

impl HeartbeatConfig {
	pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
	/// Floor applied to `interval` so a zero or tiny value cannot flood the API.
	pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

	pub fn from_secs(secs: u64) -> Self {
		Self {
			interval: Duration::from_secs(secs),
		}
	}

	/// The interval the loops actually sleep for.
	pub fn effective_interval(&self) -> Duration {
		self.interval.max(Self::MIN_INTERVAL)
	}
}

impl Default for HeartbeatConfig {
	fn default() -> Self {
		Self {
			interval: Self::DEFAULT_INTERVAL,
		}
	}
}

/// Owns at most one heartbeat task.
///
/// Sends are best-effort: a failed send is logged and the loop keeps its
/// schedule. Once [`HeartbeatKeeper::stop`] returns the task has exited, so no
/// further sends happen for the session.
#[derive(Default)]
pub struct HeartbeatKeeper {
	running: Option<Running>,
}

struct Running {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl HeartbeatKeeper {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts sending heartbeats for `ids`, first stopping any previous loop.
	pub async fn start(&mut self, api: Arc<dyn SessionApi>, ids: SessionIds, config: HeartbeatConfig) {
		self.stop().await;

		let cancel = CancellationToken::new();
		let task = tokio::spawn(heartbeat_loop(api, ids, config, cancel.clone()));
		self.running = Some(Running { cancel, task });
	}

	/// Cancels the loop and waits for it to exit. Idempotent.
	pub async fn stop(&mut self) {
		let Some(Running { cancel, task }) = self.running.take() else {
			return;
		};
		cancel.cancel();
		if let Err(err) = task.await {
			if err.is_panic() {
				warn!(target = "sbx.heartbeat", error = %err, "heartbeat task panicked");
			}
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.as_ref().is_some_and(|running| !running.task.is_finished())
	}
}

impl Drop for HeartbeatKeeper {
	fn drop(&mut self) {
		if let Some(running) = self.running.take() {
			running.cancel.cancel();
		}
	}
}

async fn heartbeat_loop(api: Arc<dyn SessionApi>, ids: SessionIds, config: HeartbeatConfig, cancel: CancellationToken) {
	let interval = config.effective_interval();
	debug!(target = "sbx.heartbeat", job_id = %ids.job_id, interval_ms = interval.as_millis() as u64, "heartbeat started");
	loop {
		let sent = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			sent = api.send_heartbeat(&ids) => sent,
		};
		match sent {
			Ok(()) => debug!(target = "sbx.heartbeat", job_id = %ids.job_id, "heartbeat sent"),
			Err(source) => {
				let err = Error::Heartbeat {
					job_id: ids.job_id.clone(),
					source,
				};
				warn!(target = "sbx.heartbeat", error = %err, "heartbeat failed; will retry on schedule");
			}
		}

		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = tokio::time::sleep(interval) => {}
		}
	}
	debug!(target = "sbx.heartbeat", job_id = %ids.job_id, "heartbeat stopped");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeSessionApiBuilder;

	#[tokio::test(start_paused = true)]
	async fn sends_on_interval_until_stopped() {
		let (api, controller) = FakeSessionApiBuilder::new().build();
		let mut keeper = HeartbeatKeeper::new();
		keeper.start(api, SessionIds::new("job-1"), HeartbeatConfig::from_secs(10)).await;

		tokio::time::sleep(Duration::from_secs(25)).await;
		assert_eq!(controller.heartbeats(), 3, "sends at t=0, 10, 20");
		assert!(keeper.is_running());

		keeper.stop().await;
		assert!(!keeper.is_running());
		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(controller.heartbeats(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn failures_do_not_stop_the_loop() {
		let (api, controller) = FakeSessionApiBuilder::new().fail_heartbeats(2).build();
		let mut keeper = HeartbeatKeeper::new();
		keeper.start(api, SessionIds::new("job-1"), HeartbeatConfig::from_secs(1)).await;

		tokio::time::sleep(Duration::from_millis(3_500)).await;
		assert_eq!(controller.heartbeats(), 4);
		assert_eq!(controller.failed_heartbeats(), 2);
		keeper.stop().await;
	}

	#[tokio::test(start_paused = true)]
	async fn restart_replaces_previous_loop() {
		let (api, controller) = FakeSessionApiBuilder::new().build();
		let mut keeper = HeartbeatKeeper::new();
		keeper.start(api.clone(), SessionIds::new("job-1"), HeartbeatConfig::from_secs(10)).await;
		tokio::time::sleep(Duration::from_secs(1)).await;
		keeper.start(api, SessionIds::new("job-1"), HeartbeatConfig::from_secs(10)).await;

		tokio::time::sleep(Duration::from_secs(15)).await;
		// one from the first loop, two from the second; a leaked first loop would add one more at t=10
		assert_eq!(controller.heartbeats(), 3);
		keeper.stop().await;
	}

	#[tokio::test(start_paused = true)]
	async fn zero_interval_is_clamped() {
		assert_eq!(HeartbeatConfig::from_secs(0).effective_interval(), HeartbeatConfig::MIN_INTERVAL);
		assert_eq!(HeartbeatConfig::from_secs(5).effective_interval(), Duration::from_secs(5));

		let (api, controller) = FakeSessionApiBuilder::new().build();
		let mut keeper = HeartbeatKeeper::new();
		keeper.start(api, SessionIds::new("job-1"), HeartbeatConfig::from_secs(0)).await;

		tokio::time::sleep(Duration::from_millis(250)).await;
		assert_eq!(controller.heartbeats(), 3, "sends at t=0, 100ms, 200ms");
		keeper.stop().await;
	}

	#[tokio::test]
	async fn stop_without_start_is_a_noop() {
		let mut keeper = HeartbeatKeeper::new();
		keeper.stop().await;
		keeper.stop().await;
		assert!(!keeper.is_running());
	}
}
