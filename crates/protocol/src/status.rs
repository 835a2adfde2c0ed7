//! Status API response bodies.

use serde::{Deserialize, Serialize};

/// Job status as reported by the status API.
///
/// ```json
/// { "status": "running" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusResponse {
	pub status: String,
}

impl JobStatusResponse {
	pub fn new(status: impl Into<String>) -> Self {
		Self { status: status.into() }
	}

	/// Returns `true` when the job reports `running`, ignoring case.
	pub fn is_running(&self) -> bool {
		self.status.eq_ignore_ascii_case("running")
	}
}

/// Worker health as reported by the status API.
///
/// `error` carries the worker's last failure message while it is not ready.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerReadyResponse {
	pub ready: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl WorkerReadyResponse {
	pub fn ready() -> Self {
		Self { ready: true, error: None }
	}

	pub fn not_ready(error: Option<&str>) -> Self {
		Self {
			ready: false,
			error: error.map(str::to_string),
		}
	}
}

/// Result of resetting a session: the backend starts a fresh run inside the same job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
	pub run_session_id: String,
}
