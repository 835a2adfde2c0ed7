//! Scripted in-memory [`SessionApi`] for tests.
//!
//! # Example
//!
//! ```ignore
//! let (api, controller) = FakeSessionApiBuilder::new()
//!     .job_statuses(["pending", "pending", "running"])
//!     .worker_ready([false, true])
//!     .build();
//! let mut session = SessionHandle::create(api, SessionIds::new("job-1"), config);
//! session.wait_for_ready(Some(Duration::from_secs(5))).await?;
//! assert_eq!(controller.job_status_calls(), 3);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sbx_protocol::{JobStatusResponse, ResetResponse, WorkerReadyResponse};

use crate::api::{ApiError, SessionApi};
use crate::session::SessionIds;

/// Replies handed out in order; the last one repeats forever.
#[derive(Debug, Clone)]
struct Script<T> {
	replies: Vec<T>,
	next: usize,
}

impl<T: Clone> Script<T> {
	fn new(replies: Vec<T>) -> Self {
		Self { replies, next: 0 }
	}

	fn next(&mut self) -> Option<T> {
		let index = self.next.min(self.replies.len().checked_sub(1)?);
		self.next += 1;
		self.replies.get(index).cloned()
	}
}

type JobReply = Result<JobStatusResponse, ApiError>;
type WorkerReply = Result<WorkerReadyResponse, ApiError>;

/// One collaborator call as recorded by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
	JobStatus,
	WorkerReady,
	Heartbeat,
	Release,
	Reset,
}

/// Builder for [`FakeSessionApi`].
///
/// Defaults to a job that is already running with a healthy worker.
pub struct FakeSessionApiBuilder {
	job: Vec<JobReply>,
	worker: Vec<WorkerReply>,
	heartbeat_failures: usize,
	release_error: Option<ApiError>,
	reset_ids: Vec<String>,
}

impl FakeSessionApiBuilder {
	pub fn new() -> Self {
		Self {
			job: Vec::new(),
			worker: Vec::new(),
			heartbeat_failures: 0,
			release_error: None,
			reset_ids: Vec::new(),
		}
	}

	/// Appends job statuses, reported in order.
	pub fn job_statuses<I, S>(mut self, statuses: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.job.extend(statuses.into_iter().map(|status| Ok(JobStatusResponse::new(status))));
		self
	}

	/// Appends a failed job status call.
	pub fn job_status_error(mut self, err: ApiError) -> Self {
		self.job.push(Err(err));
		self
	}

	/// Appends worker health flags, reported in order.
	pub fn worker_ready<I>(mut self, flags: I) -> Self
	where
		I: IntoIterator<Item = bool>,
	{
		self.worker.extend(flags.into_iter().map(|ready| {
			Ok(if ready {
				WorkerReadyResponse::ready()
			} else {
				WorkerReadyResponse::not_ready(None)
			})
		}));
		self
	}

	/// Appends an unhealthy worker response carrying `detail`.
	pub fn worker_not_ready(mut self, detail: &str) -> Self {
		self.worker.push(Ok(WorkerReadyResponse::not_ready(Some(detail))));
		self
	}

	/// Appends a failed worker health call.
	pub fn worker_error(mut self, err: ApiError) -> Self {
		self.worker.push(Err(err));
		self
	}

	/// Fails the first `count` heartbeat sends.
	pub fn fail_heartbeats(mut self, count: usize) -> Self {
		self.heartbeat_failures = count;
		self
	}

	/// Fails every release call with `err`.
	pub fn fail_release(mut self, err: ApiError) -> Self {
		self.release_error = Some(err);
		self
	}

	/// Run-session id returned by the next reset. Later resets get `run-<n>`.
	pub fn reset_run_session(mut self, run_session_id: impl Into<String>) -> Self {
		self.reset_ids.push(run_session_id.into());
		self
	}

	/// Builds the fake and its controller.
	pub fn build(self) -> (Arc<FakeSessionApi>, FakeSessionController) {
		let job = if self.job.is_empty() {
			vec![Ok(JobStatusResponse::new("running"))]
		} else {
			self.job
		};
		let worker = if self.worker.is_empty() {
			vec![Ok(WorkerReadyResponse::ready())]
		} else {
			self.worker
		};

		let state = Arc::new(Mutex::new(FakeState {
			job: Script::new(job),
			worker: Script::new(worker),
			heartbeat_failures: self.heartbeat_failures,
			failed_heartbeats: 0,
			release_error: self.release_error,
			reset_ids: self.reset_ids.into_iter().rev().collect(),
			calls: Vec::new(),
		}));

		let api = Arc::new(FakeSessionApi {
			state: Arc::clone(&state),
		});
		(api, FakeSessionController { state })
	}
}

impl Default for FakeSessionApiBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FakeState {
	job: Script<JobReply>,
	worker: Script<WorkerReply>,
	heartbeat_failures: usize,
	failed_heartbeats: usize,
	release_error: Option<ApiError>,
	/// Stack; popped from the end.
	reset_ids: Vec<String>,
	calls: Vec<(FakeCall, SessionIds)>,
}

impl FakeState {
	fn count(&self, call: FakeCall) -> usize {
		self.calls.iter().filter(|(recorded, _)| *recorded == call).count()
	}
}

/// In-memory [`SessionApi`] driven by a script.
pub struct FakeSessionApi {
	state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl SessionApi for FakeSessionApi {
	async fn job_status(&self, ids: &SessionIds) -> Result<JobStatusResponse, ApiError> {
		let mut state = self.state.lock();
		state.calls.push((FakeCall::JobStatus, ids.clone()));
		state
			.job
			.next()
			.unwrap_or_else(|| Err(ApiError::Decode("no scripted job status".into())))
	}

	async fn worker_ready(&self, ids: &SessionIds) -> Result<WorkerReadyResponse, ApiError> {
		let mut state = self.state.lock();
		state.calls.push((FakeCall::WorkerReady, ids.clone()));
		state
			.worker
			.next()
			.unwrap_or_else(|| Err(ApiError::Decode("no scripted worker status".into())))
	}

	async fn send_heartbeat(&self, ids: &SessionIds) -> Result<(), ApiError> {
		let mut state = self.state.lock();
		state.calls.push((FakeCall::Heartbeat, ids.clone()));
		if state.heartbeat_failures > 0 {
			state.heartbeat_failures -= 1;
			state.failed_heartbeats += 1;
			return Err(ApiError::Status {
				code: 503,
				message: "heartbeat rejected".into(),
			});
		}
		Ok(())
	}

	async fn release_session(&self, ids: &SessionIds) -> Result<(), ApiError> {
		let mut state = self.state.lock();
		state.calls.push((FakeCall::Release, ids.clone()));
		match &state.release_error {
			Some(err) => Err(err.clone()),
			None => Ok(()),
		}
	}

	async fn reset_session(&self, ids: &SessionIds) -> Result<ResetResponse, ApiError> {
		let mut state = self.state.lock();
		state.calls.push((FakeCall::Reset, ids.clone()));
		let resets = state.count(FakeCall::Reset);
		let run_session_id = state.reset_ids.pop().unwrap_or_else(|| format!("run-{resets}"));
		Ok(ResetResponse { run_session_id })
	}
}

/// Inspects and re-scripts a [`FakeSessionApi`] after it has been handed out.
#[derive(Clone)]
pub struct FakeSessionController {
	state: Arc<Mutex<FakeState>>,
}

impl FakeSessionController {
	pub fn job_status_calls(&self) -> usize {
		self.state.lock().count(FakeCall::JobStatus)
	}

	pub fn worker_ready_calls(&self) -> usize {
		self.state.lock().count(FakeCall::WorkerReady)
	}

	/// Heartbeat sends attempted, including failed ones.
	pub fn heartbeats(&self) -> usize {
		self.state.lock().count(FakeCall::Heartbeat)
	}

	pub fn failed_heartbeats(&self) -> usize {
		self.state.lock().failed_heartbeats
	}

	pub fn releases(&self) -> usize {
		self.state.lock().count(FakeCall::Release)
	}

	pub fn resets(&self) -> usize {
		self.state.lock().count(FakeCall::Reset)
	}

	/// Every call in the order it was made.
	pub fn calls(&self) -> Vec<FakeCall> {
		self.state.lock().calls.iter().map(|(call, _)| call.clone()).collect()
	}

	/// Session ids passed with the most recent call.
	pub fn last_ids(&self) -> Option<SessionIds> {
		self.state.lock().calls.last().map(|(_, ids)| ids.clone())
	}

	/// Replaces the job status script from now on.
	pub fn set_job_status(&self, status: &str) {
		self.state.lock().job = Script::new(vec![Ok(JobStatusResponse::new(status))]);
	}

	/// Replaces the worker health script from now on.
	pub fn set_worker_ready(&self, ready: bool) {
		let reply = if ready {
			WorkerReadyResponse::ready()
		} else {
			WorkerReadyResponse::not_ready(None)
		};
		self.state.lock().worker = Script::new(vec![Ok(reply)]);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn last_scripted_reply_repeats() {
		let (api, controller) = FakeSessionApiBuilder::new().job_statuses(["pending", "running"]).build();
		let ids = SessionIds::new("job-1");

		let statuses: Vec<String> = [
			api.job_status(&ids).await.unwrap(),
			api.job_status(&ids).await.unwrap(),
			api.job_status(&ids).await.unwrap(),
		]
		.into_iter()
		.map(|response| response.status)
		.collect();
		assert_eq!(statuses, ["pending", "running", "running"]);
		assert_eq!(controller.job_status_calls(), 3);
	}

	#[tokio::test]
	async fn resets_use_scripted_then_generated_ids() {
		let (api, controller) = FakeSessionApiBuilder::new().reset_run_session("run-a").build();
		let ids = SessionIds::new("job-1");

		assert_eq!(api.reset_session(&ids).await.unwrap().run_session_id, "run-a");
		assert_eq!(api.reset_session(&ids).await.unwrap().run_session_id, "run-2");
		assert_eq!(controller.calls(), [FakeCall::Reset, FakeCall::Reset]);
	}

	#[tokio::test]
	async fn controller_rescripts_live_fake() {
		let (api, controller) = FakeSessionApiBuilder::new().worker_ready([false]).build();
		let ids = SessionIds::new("job-1");
		assert!(!api.worker_ready(&ids).await.unwrap().ready);

		controller.set_worker_ready(true);
		assert!(api.worker_ready(&ids).await.unwrap().ready);
	}
}
