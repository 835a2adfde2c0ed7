//! Two-phase readiness detection.
//!
//! The backend reports readiness in two eventually-consistent stages: the job
//! is scheduled (`running`), then the worker inside it passes its health
//! check. Both phases poll against one absolute deadline computed when the
//! wait starts, so a slow first phase shrinks the budget left for the second.

use std::sync::Arc;
use std::time::Duration;

use sbx_protocol::{JobStatusResponse, WorkerReadyResponse};
use sbx_runtime::{BackoffPolicy, PollError, PollOutcome, poll_until_ready};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::{ApiError, SessionApi};
use crate::error::{Error, Result};
use crate::session::SessionIds;

/// Stage of the readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPhase {
	/// Waiting for the job status to read `running`.
	JobRunning,
	/// Waiting for the worker health check to report `ready`.
	WorkerHealthy,
}

impl ReadinessPhase {
	pub fn as_str(&self) -> &'static str {
		match self {
			ReadinessPhase::JobRunning => "job_running",
			ReadinessPhase::WorkerHealthy => "worker_healthy",
		}
	}

	/// Caller-facing message for a deadline miss in this phase.
	pub fn timeout_message(&self, detail: &str) -> String {
		match self {
			ReadinessPhase::JobRunning => format!("job never entered running state (last status: {detail})"),
			ReadinessPhase::WorkerHealthy => format!("worker not ready: {detail}"),
		}
	}

	pub(crate) fn job_outcome(result: std::result::Result<JobStatusResponse, ApiError>) -> std::result::Result<PollOutcome, ApiError> {
		match result {
			Ok(status) if status.is_running() => Ok(PollOutcome::Ready),
			Ok(status) => Ok(PollOutcome::NotReady(status.status)),
			Err(err) if err.is_transient() => Ok(PollOutcome::NotReady(err.to_string())),
			Err(err) => Err(err),
		}
	}

	pub(crate) fn worker_outcome(result: std::result::Result<WorkerReadyResponse, ApiError>) -> std::result::Result<PollOutcome, ApiError> {
		match result {
			Ok(health) if health.ready => Ok(PollOutcome::Ready),
			Ok(health) => Ok(PollOutcome::NotReady(
				health.error.unwrap_or_else(|| "worker reported not ready".to_string()),
			)),
			Err(err) if err.is_transient() => Ok(PollOutcome::NotReady(err.to_string())),
			Err(err) => Err(err),
		}
	}

	pub(crate) fn into_error(self, err: PollError<ApiError>) -> Error {
		match err {
			PollError::TimedOut { last_detail, .. } => Error::ReadinessTimeout {
				phase: self,
				detail: last_detail.unwrap_or_else(|| "no status received".to_string()),
			},
			PollError::Query(api) => Error::Api(api),
		}
	}
}

impl std::fmt::Display for ReadinessPhase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Drives both readiness phases for one session against a [`SessionApi`].
pub struct ReadinessController {
	api: Arc<dyn SessionApi>,
	policy: BackoffPolicy,
}

impl ReadinessController {
	pub fn new(api: Arc<dyn SessionApi>) -> Self {
		Self {
			api,
			policy: BackoffPolicy::ASYNC_READINESS,
		}
	}

	pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn policy(&self) -> BackoffPolicy {
		self.policy
	}

	/// Waits until the job runs and its worker is healthy.
	pub async fn wait_for_ready(&self, ids: &SessionIds, timeout: Option<Duration>) -> Result<()> {
		self.wait_for_ready_with(ids, timeout, |_| {}).await
	}

	/// Like [`Self::wait_for_ready`], calling `on_phase` as each phase begins.
	pub async fn wait_for_ready_with<F>(&self, ids: &SessionIds, timeout: Option<Duration>, mut on_phase: F) -> Result<()>
	where
		F: FnMut(ReadinessPhase) + Send,
	{
		let started = Instant::now();
		let deadline = timeout.map(|timeout| started + timeout);
		let api = &*self.api;

		on_phase(ReadinessPhase::JobRunning);
		debug!(target = "sbx.readiness", job_id = %ids.job_id, timeout = ?timeout, "waiting for job to run");
		let attempts = poll_until_ready(self.policy, deadline, move || async move { ReadinessPhase::job_outcome(api.job_status(ids).await) })
			.await
			.map_err(|err| ReadinessPhase::JobRunning.into_error(err))?;
		debug!(target = "sbx.readiness", job_id = %ids.job_id, attempts, elapsed_ms = started.elapsed().as_millis() as u64, "job running");

		on_phase(ReadinessPhase::WorkerHealthy);
		let attempts = poll_until_ready(self.policy, deadline, move || async move {
			ReadinessPhase::worker_outcome(api.worker_ready(ids).await)
		})
		.await
		.map_err(|err| ReadinessPhase::WorkerHealthy.into_error(err))?;

		info!(
			target = "sbx.readiness",
			job_id = %ids.job_id,
			attempts,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"session ready"
		);
		Ok(())
	}
}
