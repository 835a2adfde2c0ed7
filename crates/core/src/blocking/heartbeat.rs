use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::api::SessionApi;
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatConfig;
use crate::session::SessionIds;

/// How long [`ThreadHeartbeat::stop`] waits for the thread to exit.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Heartbeat loop on a dedicated OS thread.
///
/// The thread sleeps on a stop channel, so a stop request interrupts the
/// interval immediately. A send already in flight finishes first.
#[derive(Default)]
pub struct ThreadHeartbeat {
	running: Option<Running>,
}

struct Running {
	stop: mpsc::Sender<()>,
	exited: mpsc::Receiver<()>,
	thread: JoinHandle<()>,
}

impl ThreadHeartbeat {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stops any previous thread, then spawns a new one driving sends on `runtime`.
	pub fn start(&mut self, runtime: Handle, api: Arc<dyn SessionApi>, ids: SessionIds, config: HeartbeatConfig) -> Result<()> {
		self.stop();

		let (stop_tx, stop_rx) = mpsc::channel::<()>();
		let (exited_tx, exited_rx) = mpsc::channel::<()>();
		let thread = thread::Builder::new()
			.name(format!("sbx-heartbeat-{}", ids.job_id))
			.spawn(move || {
				// Dropped when the thread exits, panicking or not.
				let _exited = exited_tx;
				heartbeat_thread(runtime, api, ids, config, stop_rx);
			})
			.map_err(Error::Io)?;

		self.running = Some(Running {
			stop: stop_tx,
			exited: exited_rx,
			thread,
		});
		Ok(())
	}

	/// Signals the thread and joins it within [`STOP_GRACE`]. Idempotent.
	pub fn stop(&mut self) {
		self.stop_within(STOP_GRACE);
	}

	/// Like [`Self::stop`] with an explicit grace period.
	///
	/// Returns `false` if the thread did not exit in time; it is then detached
	/// and exits on its own once its current send returns.
	pub fn stop_within(&mut self, grace: Duration) -> bool {
		let Some(Running { stop, exited, thread }) = self.running.take() else {
			return true;
		};
		let _ = stop.send(());

		match exited.recv_timeout(grace) {
			Err(RecvTimeoutError::Timeout) => {
				warn!(
					target = "sbx.heartbeat",
					grace_ms = grace.as_millis() as u64,
					"heartbeat thread did not stop in time; detaching"
				);
				false
			}
			Ok(()) | Err(RecvTimeoutError::Disconnected) => {
				if thread.join().is_err() {
					warn!(target = "sbx.heartbeat", "heartbeat thread panicked");
				}
				true
			}
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.as_ref().is_some_and(|running| !running.thread.is_finished())
	}
}

impl Drop for ThreadHeartbeat {
	fn drop(&mut self) {
		if let Some(running) = self.running.take() {
			let _ = running.stop.send(());
		}
	}
}

fn heartbeat_thread(runtime: Handle, api: Arc<dyn SessionApi>, ids: SessionIds, config: HeartbeatConfig, stop: mpsc::Receiver<()>) {
	let interval = config.effective_interval();
	debug!(target = "sbx.heartbeat", job_id = %ids.job_id, interval_ms = interval.as_millis() as u64, "heartbeat thread started");
	loop {
		match runtime.block_on(api.send_heartbeat(&ids)) {
			Ok(()) => debug!(target = "sbx.heartbeat", job_id = %ids.job_id, "heartbeat sent"),
			Err(source) => {
				let err = Error::Heartbeat {
					job_id: ids.job_id.clone(),
					source,
				};
				warn!(target = "sbx.heartbeat", error = %err, "heartbeat failed; will retry on schedule");
			}
		}

		match stop.recv_timeout(interval) {
			Err(RecvTimeoutError::Timeout) => continue,
			Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
		}
	}
	debug!(target = "sbx.heartbeat", job_id = %ids.job_id, "heartbeat thread stopped");
}

#[cfg(test)]
mod tests {
	use std::time::Instant;

	use super::*;
	use crate::testing::FakeSessionApiBuilder;

	fn runtime() -> tokio::runtime::Runtime {
		tokio::runtime::Builder::new_multi_thread().worker_threads(1).enable_all().build().unwrap()
	}

	#[test]
	fn stop_interrupts_the_interval() {
		let runtime = runtime();
		let (api, controller) = FakeSessionApiBuilder::new().build();
		let mut heartbeat = ThreadHeartbeat::new();
		heartbeat
			.start(runtime.handle().clone(), api, SessionIds::new("job-1"), HeartbeatConfig::from_secs(3600))
			.unwrap();

		let deadline = Instant::now() + Duration::from_secs(2);
		while controller.heartbeats() == 0 && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(5));
		}
		assert!(heartbeat.is_running());

		let started = Instant::now();
		assert!(heartbeat.stop_within(Duration::from_secs(2)));
		assert!(started.elapsed() < Duration::from_secs(1));
		assert!(!heartbeat.is_running());

		thread::sleep(Duration::from_millis(50));
		assert_eq!(controller.heartbeats(), 1);
	}

	#[test]
	fn repeats_at_clamped_interval_and_survives_failures() {
		let runtime = runtime();
		let (api, controller) = FakeSessionApiBuilder::new().fail_heartbeats(1).build();
		let mut heartbeat = ThreadHeartbeat::new();
		let config = HeartbeatConfig {
			interval: Duration::from_millis(1),
		};
		let started = Instant::now();
		heartbeat.start(runtime.handle().clone(), api, SessionIds::new("job-1"), config).unwrap();

		let deadline = Instant::now() + Duration::from_secs(5);
		while controller.heartbeats() < 3 && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(5));
		}
		assert!(started.elapsed() >= 2 * HeartbeatConfig::MIN_INTERVAL, "third send came after {:?}", started.elapsed());
		heartbeat.stop();

		let sent = controller.heartbeats();
		assert!(sent >= 3, "only {sent} heartbeats");
		assert_eq!(controller.failed_heartbeats(), 1);
		thread::sleep(Duration::from_millis(300));
		assert_eq!(controller.heartbeats(), sent);
	}

	#[test]
	fn stop_without_start_is_a_noop() {
		let mut heartbeat = ThreadHeartbeat::new();
		assert!(heartbeat.stop_within(Duration::from_millis(1)));
		heartbeat.stop();
	}
}
