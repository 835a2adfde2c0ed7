//! Threaded session model for callers without an async runtime.
//!
//! [`SessionHandle`] exposes the same lifecycle as [`crate::SessionHandle`],
//! but every method blocks the calling thread. Readiness polling sleeps on
//! the caller's thread with the more patient [`BackoffPolicy::THREADED_READINESS`]
//! schedule, and the heartbeat runs on its own OS thread. An internal tokio
//! runtime drives collaborator calls and the tunnel sockets.
//!
//! None of these methods may be called from inside an async context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sbx_runtime::{BackoffPolicy, poll_until_ready_blocking};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::readiness::ReadinessPhase;
use crate::session::{SessionIds, SessionState};
use crate::tunnel::{ProxyCredential, TunnelEndpoint, TunnelRelay};

mod heartbeat;

pub use heartbeat::{STOP_GRACE, ThreadHeartbeat};

/// Blocking counterpart of [`crate::SessionHandle`].
pub struct SessionHandle {
	api: Arc<dyn SessionApi>,
	ids: SessionIds,
	config: SandboxConfig,
	state: SessionState,
	policy: BackoffPolicy,
	heartbeat: ThreadHeartbeat,
	tunnel: Option<TunnelRelay>,
	// Declared last so the tunnel and heartbeat are torn down first.
	runtime: Runtime,
}

impl SessionHandle {
	/// Wraps an already requested session and starts the internal runtime.
	pub fn create(api: Arc<dyn SessionApi>, ids: SessionIds, config: SandboxConfig) -> Result<Self> {
		let runtime = tokio::runtime::Builder::new_multi_thread()
			.worker_threads(2)
			.thread_name("sbx-io")
			.enable_all()
			.build()?;
		debug!(target = "sbx.session", job_id = %ids.job_id, "blocking session handle created");
		Ok(Self {
			api,
			ids,
			config,
			state: SessionState::Created,
			policy: BackoffPolicy::THREADED_READINESS,
			heartbeat: ThreadHeartbeat::new(),
			tunnel: None,
			runtime,
		})
	}

	pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn ids(&self) -> &SessionIds {
		&self.ids
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	pub fn tunnel_port(&self) -> Option<u16> {
		self.tunnel.as_ref().and_then(TunnelRelay::local_port)
	}

	pub fn heartbeat_running(&self) -> bool {
		self.heartbeat.is_running()
	}

	/// Waits for both readiness phases against one deadline, then starts the heartbeat thread.
	pub fn wait_for_ready(&mut self, timeout: Option<Duration>) -> Result<()> {
		self.ensure_open("wait for readiness")?;
		if self.state.is_ready() {
			return Ok(());
		}

		if let Err(err) = self.poll_phases(timeout) {
			warn!(target = "sbx.session", job_id = %self.ids.job_id, error = %err, "session failed to become ready");
			self.state = SessionState::Failed(err.to_string());
			return Err(err);
		}

		self.state = SessionState::Ready;
		self.heartbeat.start(
			self.runtime.handle().clone(),
			Arc::clone(&self.api),
			self.ids.clone(),
			self.config.heartbeat,
		)?;
		info!(target = "sbx.session", job_id = %self.ids.job_id, "session ready");
		Ok(())
	}

	fn poll_phases(&mut self, timeout: Option<Duration>) -> Result<()> {
		let started = Instant::now();
		let deadline = timeout.map(|timeout| started + timeout);
		let runtime = &self.runtime;
		let api = &*self.api;
		let ids = &self.ids;

		self.state = SessionState::awaiting(ReadinessPhase::JobRunning);
		poll_until_ready_blocking(self.policy, deadline, || ReadinessPhase::job_outcome(runtime.block_on(api.job_status(ids))))
			.map_err(|err| ReadinessPhase::JobRunning.into_error(err))?;
		debug!(target = "sbx.readiness", job_id = %ids.job_id, elapsed_ms = started.elapsed().as_millis() as u64, "job running");

		self.state = SessionState::awaiting(ReadinessPhase::WorkerHealthy);
		poll_until_ready_blocking(self.policy, deadline, || ReadinessPhase::worker_outcome(runtime.block_on(api.worker_ready(ids))))
			.map_err(|err| ReadinessPhase::WorkerHealthy.into_error(err))?;
		Ok(())
	}

	/// Opens a loopback tunnel to `dest_port`; the relay runs on the internal runtime.
	pub fn start_db_tunnel(&mut self, dest_port: u16, local_port: Option<u16>) -> Result<u16> {
		self.ensure_open("start a tunnel")?;
		if let Some(port) = self.tunnel_port() {
			return Err(Error::TunnelAlreadyRunning(port));
		}

		let endpoint = TunnelEndpoint::new(self.config.proxy_address()?, self.config.tunnel_dest_host.clone(), dest_port)
			.with_local_port(local_port)
			.with_tls(self.config.proxy_tls)
			.with_connect_timeout(self.config.connect_timeout);
		let mut relay = TunnelRelay::new(endpoint, Some(ProxyCredential::for_session(&self.ids)));
		let port = self.runtime.block_on(relay.start())?;

		info!(target = "sbx.session", job_id = %self.ids.job_id, local_port = port, dest_port, "database tunnel started");
		self.tunnel = Some(relay);
		Ok(port)
	}

	pub fn stop_db_tunnel(&mut self) {
		if let Some(mut relay) = self.tunnel.take() {
			self.runtime.block_on(relay.stop());
			debug!(target = "sbx.session", job_id = %self.ids.job_id, "database tunnel stopped");
		}
	}

	/// Starts a fresh run inside the job; the session must be waited on again.
	pub fn reset(&mut self) -> Result<&SessionIds> {
		self.ensure_open("reset")?;
		self.stop_local();

		let reset = self.runtime.block_on(self.api.reset_session(&self.ids))?;
		info!(target = "sbx.session", job_id = %self.ids.job_id, run_session_id = %reset.run_session_id, "session reset");
		self.ids.run_session_id = Some(reset.run_session_id);
		self.state = SessionState::Created;
		Ok(&self.ids)
	}

	/// Stops local activity without releasing the remote session.
	pub fn detach(&mut self) {
		if self.state.is_closed() {
			return;
		}
		self.stop_local();
		self.state = SessionState::Closed;
	}

	/// Stops the heartbeat, then the tunnel, then releases the remote session. Idempotent.
	pub fn close(&mut self) {
		if self.state.is_closed() {
			return;
		}
		self.stop_local();

		if let Err(err) = self.runtime.block_on(self.api.release_session(&self.ids)) {
			warn!(target = "sbx.session", job_id = %self.ids.job_id, error = %err, "failed to release session");
		}
		self.state = SessionState::Closed;
		info!(target = "sbx.session", job_id = %self.ids.job_id, "session closed");
	}

	fn stop_local(&mut self) {
		self.heartbeat.stop();
		self.stop_db_tunnel();
	}

	fn ensure_open(&self, action: &str) -> Result<()> {
		if self.state.is_closed() {
			return Err(Error::InvalidState(format!("cannot {action}: session {} is closed", self.ids.job_id)));
		}
		Ok(())
	}
}
