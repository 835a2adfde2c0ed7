//! Remote status API collaborator.
//!
//! The control plane never talks HTTP itself; it consumes the status API
//! through [`SessionApi`]. `sbx-cli` ships a reqwest implementation and
//! [`crate::testing`] provides a scripted in-memory one.

use async_trait::async_trait;
use sbx_protocol::{JobStatusResponse, ResetResponse, WorkerReadyResponse};
use thiserror::Error;

use crate::session::SessionIds;

/// Failure reported by a [`SessionApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
	/// The request never produced a response (DNS, connect, reset, timeout).
	#[error("status API unreachable: {0}")]
	Transport(String),
	/// The API answered with a non-success status.
	#[error("status API returned {code}: {message}")]
	Status { code: u16, message: String },
	/// The response body did not have the expected shape.
	#[error("malformed status API response: {0}")]
	Decode(String),
}

impl ApiError {
	/// Whether a retry can reasonably succeed.
	///
	/// A freshly created job can briefly 404 while the backend catches up, so
	/// not-found counts as transient alongside throttling and server errors.
	pub fn is_transient(&self) -> bool {
		match self {
			ApiError::Transport(_) => true,
			ApiError::Status { code, .. } => matches!(code, 404 | 408 | 425 | 429 | 500..=599),
			ApiError::Decode(_) => false,
		}
	}
}

/// Operations the control plane consumes from the remote status API.
#[async_trait]
pub trait SessionApi: Send + Sync {
	/// Current job status (`running` once the sandbox has been scheduled).
	async fn job_status(&self, ids: &SessionIds) -> Result<JobStatusResponse, ApiError>;

	/// Worker health check result.
	async fn worker_ready(&self, ids: &SessionIds) -> Result<WorkerReadyResponse, ApiError>;

	/// Keeps the session from being reaped for inactivity.
	async fn send_heartbeat(&self, ids: &SessionIds) -> Result<(), ApiError>;

	/// Releases the remote session.
	async fn release_session(&self, ids: &SessionIds) -> Result<(), ApiError>;

	/// Starts a fresh run inside the job and returns its run-session id.
	async fn reset_session(&self, ids: &SessionIds) -> Result<ResetResponse, ApiError>;
}
