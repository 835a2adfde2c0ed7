//! HTTP implementation of [`SessionApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use sbx::{ApiError, SessionApi, SessionIds};
use sbx_protocol::{JobStatusResponse, ResetResponse, WorkerReadyResponse};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

/// Per-request ceiling; readiness waits are bounded separately.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ERROR_BODY: usize = 512;

/// Status API client over `{base_url}/api/jobs/{job}/...`.
#[derive(Debug, Clone)]
pub struct HttpSessionApi {
	client: Client,
	base_url: Url,
	api_key: Option<String>,
}

impl HttpSessionApi {
	pub fn new(base_url: Url, api_key: Option<String>) -> Result<Self, ApiError> {
		if base_url.cannot_be_a_base() {
			return Err(ApiError::Transport(format!("base URL cannot carry a path: {base_url}")));
		}
		let client = Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.user_agent(concat!("sbx/", env!("CARGO_PKG_VERSION")))
			.build()
			.map_err(|err| ApiError::Transport(err.to_string()))?;
		Ok(Self { client, base_url, api_key })
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// `{base}/api/jobs/{job}/{suffix..}`, plus `run_session_id` when known.
	pub fn job_url(&self, ids: &SessionIds, suffix: &[&str]) -> Result<Url, ApiError> {
		let mut url = self.base_url.clone();
		url.path_segments_mut()
			.map_err(|()| ApiError::Transport(format!("base URL cannot carry a path: {}", self.base_url)))?
			.pop_if_empty()
			.extend(["api", "jobs", ids.job_id.as_str()])
			.extend(suffix);
		if let Some(run_session_id) = &ids.run_session_id {
			url.query_pairs_mut().append_pair("run_session_id", run_session_id);
		}
		Ok(url)
	}

	fn request(&self, method: Method, url: Url) -> RequestBuilder {
		let request = self.client.request(method, url);
		match &self.api_key {
			Some(key) => request.bearer_auth(key),
			None => request,
		}
	}

	async fn send(&self, method: Method, ids: &SessionIds, suffix: &[&str]) -> Result<Response, ApiError> {
		let url = self.job_url(ids, suffix)?;
		debug!(target = "sbx.api", %method, path = url.path(), "request");
		let response = self.request(method, url).send().await.map_err(|err| ApiError::Transport(err.to_string()))?;

		let status = response.status();
		if status.is_success() {
			return Ok(response);
		}
		let body = response.text().await.unwrap_or_default();
		Err(ApiError::Status {
			code: status.as_u16(),
			message: error_message(status.canonical_reason(), &body),
		})
	}

	async fn json<T: DeserializeOwned>(&self, method: Method, ids: &SessionIds, suffix: &[&str]) -> Result<T, ApiError> {
		let response = self.send(method, ids, suffix).await?;
		let bytes = response.bytes().await.map_err(|err| ApiError::Transport(err.to_string()))?;
		serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
	}
}

fn error_message(reason: Option<&str>, body: &str) -> String {
	let body = body.trim();
	if body.is_empty() {
		return reason.unwrap_or("request failed").to_string();
	}
	match body.char_indices().nth(MAX_ERROR_BODY) {
		Some((cut, _)) => format!("{}...", &body[..cut]),
		None => body.to_string(),
	}
}

#[async_trait]
impl SessionApi for HttpSessionApi {
	async fn job_status(&self, ids: &SessionIds) -> Result<JobStatusResponse, ApiError> {
		self.json(Method::GET, ids, &["status"]).await
	}

	async fn worker_ready(&self, ids: &SessionIds) -> Result<WorkerReadyResponse, ApiError> {
		self.json(Method::GET, ids, &["worker", "ready"]).await
	}

	async fn send_heartbeat(&self, ids: &SessionIds) -> Result<(), ApiError> {
		self.send(Method::POST, ids, &["heartbeat"]).await.map(drop)
	}

	async fn release_session(&self, ids: &SessionIds) -> Result<(), ApiError> {
		self.send(Method::DELETE, ids, &[]).await.map(drop)
	}

	async fn reset_session(&self, ids: &SessionIds) -> Result<ResetResponse, ApiError> {
		self.json(Method::POST, ids, &["reset"]).await
	}
}
