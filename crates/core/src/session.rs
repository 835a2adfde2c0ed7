//! One session's lifecycle: readiness, heartbeat, tunnel, release.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatKeeper;
use crate::readiness::{ReadinessController, ReadinessPhase};
use crate::tunnel::{ProxyCredential, TunnelEndpoint, TunnelRelay};

/// Identifiers of a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIds {
	pub job_id: String,
	/// Assigned by a reset; absent for a session that was never reset.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub run_session_id: Option<String>,
}

impl SessionIds {
	pub fn new(job_id: impl Into<String>) -> Self {
		Self {
			job_id: job_id.into(),
			run_session_id: None,
		}
	}

	pub fn with_run_session(mut self, run_session_id: impl Into<String>) -> Self {
		self.run_session_id = Some(run_session_id.into());
		self
	}
}

/// Where a [`SessionHandle`] is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Created,
	AwaitingJobRunning,
	AwaitingWorkerHealthy,
	Ready,
	Failed(String),
	Closed,
}

impl SessionState {
	pub fn as_str(&self) -> &'static str {
		match self {
			SessionState::Created => "created",
			SessionState::AwaitingJobRunning => "awaiting_job_running",
			SessionState::AwaitingWorkerHealthy => "awaiting_worker_healthy",
			SessionState::Ready => "ready",
			SessionState::Failed(_) => "failed",
			SessionState::Closed => "closed",
		}
	}

	pub fn is_ready(&self) -> bool {
		matches!(self, SessionState::Ready)
	}

	pub fn is_closed(&self) -> bool {
		matches!(self, SessionState::Closed)
	}

	pub(crate) fn awaiting(phase: ReadinessPhase) -> Self {
		match phase {
			ReadinessPhase::JobRunning => SessionState::AwaitingJobRunning,
			ReadinessPhase::WorkerHealthy => SessionState::AwaitingWorkerHealthy,
		}
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SessionState::Failed(reason) => write!(f, "failed: {reason}"),
			other => f.write_str(other.as_str()),
		}
	}
}

/// Owns one remote session.
///
/// Holds at most one heartbeat loop and one tunnel. Dropping the handle stops
/// both but does not release the remote session; call [`SessionHandle::close`].
pub struct SessionHandle {
	api: Arc<dyn SessionApi>,
	ids: SessionIds,
	config: SandboxConfig,
	state: SessionState,
	readiness: ReadinessController,
	heartbeat: HeartbeatKeeper,
	tunnel: Option<TunnelRelay>,
}

impl SessionHandle {
	/// Wraps an already requested session. Performs no I/O.
	pub fn create(api: Arc<dyn SessionApi>, ids: SessionIds, config: SandboxConfig) -> Self {
		debug!(target = "sbx.session", job_id = %ids.job_id, "session handle created");
		Self {
			readiness: ReadinessController::new(Arc::clone(&api)),
			api,
			ids,
			config,
			state: SessionState::Created,
			heartbeat: HeartbeatKeeper::new(),
			tunnel: None,
		}
	}

	/// Replaces the readiness controller, e.g. to change its backoff policy.
	pub fn with_readiness(mut self, readiness: ReadinessController) -> Self {
		self.readiness = readiness;
		self
	}

	pub fn ids(&self) -> &SessionIds {
		&self.ids
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	pub fn config(&self) -> &SandboxConfig {
		&self.config
	}

	/// Local port of the running tunnel, if any.
	pub fn tunnel_port(&self) -> Option<u16> {
		self.tunnel.as_ref().and_then(TunnelRelay::local_port)
	}

	pub fn heartbeat_running(&self) -> bool {
		self.heartbeat.is_running()
	}

	/// Waits for both readiness phases, then starts the heartbeat.
	///
	/// `timeout` bounds the whole wait. On failure the state becomes
	/// [`SessionState::Failed`]; the call may be retried.
	pub async fn wait_for_ready(&mut self, timeout: Option<Duration>) -> Result<()> {
		self.ensure_open("wait for readiness")?;
		if self.state.is_ready() {
			return Ok(());
		}

		let state = &mut self.state;
		let waited = self
			.readiness
			.wait_for_ready_with(&self.ids, timeout, |phase| *state = SessionState::awaiting(phase))
			.await;

		if let Err(err) = waited {
			warn!(target = "sbx.session", job_id = %self.ids.job_id, error = %err, "session failed to become ready");
			self.state = SessionState::Failed(err.to_string());
			return Err(err);
		}

		self.state = SessionState::Ready;
		self.heartbeat
			.start(Arc::clone(&self.api), self.ids.clone(), self.config.heartbeat)
			.await;
		info!(target = "sbx.session", job_id = %self.ids.job_id, "session ready");
		Ok(())
	}

	/// Opens a loopback tunnel to `dest_port` inside the sandbox.
	///
	/// Returns the bound local port. Fails if a tunnel is already running.
	pub async fn start_db_tunnel(&mut self, dest_port: u16, local_port: Option<u16>) -> Result<u16> {
		self.ensure_open("start a tunnel")?;
		if let Some(port) = self.tunnel_port() {
			return Err(Error::TunnelAlreadyRunning(port));
		}

		let endpoint = TunnelEndpoint::new(self.config.proxy_address()?, self.config.tunnel_dest_host.clone(), dest_port)
			.with_local_port(local_port)
			.with_tls(self.config.proxy_tls)
			.with_connect_timeout(self.config.connect_timeout);
		let mut relay = TunnelRelay::new(endpoint, Some(ProxyCredential::for_session(&self.ids)));
		let port = relay.start().await?;

		info!(target = "sbx.session", job_id = %self.ids.job_id, local_port = port, dest_port, "database tunnel started");
		self.tunnel = Some(relay);
		Ok(port)
	}

	/// Stops the tunnel if one is running. Idempotent.
	pub async fn stop_db_tunnel(&mut self) {
		if let Some(mut relay) = self.tunnel.take() {
			relay.stop().await;
			debug!(target = "sbx.session", job_id = %self.ids.job_id, "database tunnel stopped");
		}
	}

	/// Starts a fresh run inside the job and adopts its run-session id.
	///
	/// Stops heartbeat and tunnel first; the session must be waited on again.
	pub async fn reset(&mut self) -> Result<&SessionIds> {
		self.ensure_open("reset")?;
		self.stop_local().await;

		let reset = self.api.reset_session(&self.ids).await?;
		info!(
			target = "sbx.session",
			job_id = %self.ids.job_id,
			run_session_id = %reset.run_session_id,
			"session reset"
		);
		self.ids.run_session_id = Some(reset.run_session_id);
		self.state = SessionState::Created;
		Ok(&self.ids)
	}

	/// Stops local activity and marks the handle closed without releasing
	/// the remote session, which stays available to other clients.
	pub async fn detach(&mut self) {
		if self.state.is_closed() {
			return;
		}
		self.stop_local().await;
		self.state = SessionState::Closed;
		debug!(target = "sbx.session", job_id = %self.ids.job_id, "session detached");
	}

	/// Stops the heartbeat, then the tunnel, then releases the remote session.
	///
	/// Every step runs even if an earlier one fails. Idempotent.
	pub async fn close(&mut self) {
		if self.state.is_closed() {
			return;
		}
		self.stop_local().await;

		if let Err(err) = self.api.release_session(&self.ids).await {
			warn!(target = "sbx.session", job_id = %self.ids.job_id, error = %err, "failed to release session");
		}
		self.state = SessionState::Closed;
		info!(target = "sbx.session", job_id = %self.ids.job_id, "session closed");
	}

	async fn stop_local(&mut self) {
		self.heartbeat.stop().await;
		self.stop_db_tunnel().await;
	}

	fn ensure_open(&self, action: &str) -> Result<()> {
		if self.state.is_closed() {
			return Err(Error::InvalidState(format!("cannot {action}: session {} is closed", self.ids.job_id)));
		}
		Ok(())
	}
}

impl Drop for SessionHandle {
	fn drop(&mut self) {
		if !self.state.is_closed() {
			debug!(target = "sbx.session", job_id = %self.ids.job_id, state = %self.state, "session handle dropped without close");
		}
	}
}
