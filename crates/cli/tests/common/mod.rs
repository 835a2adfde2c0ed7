#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;

/// One request as seen by [`FakeStatusApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
	pub method: String,
	pub path: String,
	pub query: Option<String>,
	pub authorization: Option<String>,
}

struct Inner {
	job_status: String,
	worker_ready: bool,
	worker_error: Option<String>,
	status_failure: Option<u16>,
	raw_status_body: Option<String>,
	release_failure: Option<u16>,
	next_run_session: String,
	requests: Vec<Recorded>,
}

type Shared = Arc<Mutex<Inner>>;

/// In-process status API on a random loopback port.
#[derive(Clone)]
pub struct FakeStatusApi {
	inner: Shared,
	addr: SocketAddr,
}

impl FakeStatusApi {
	/// Starts with a running job and a healthy worker.
	pub async fn spawn() -> Self {
		let inner: Shared = Arc::new(Mutex::new(Inner {
			job_status: "running".into(),
			worker_ready: true,
			worker_error: None,
			status_failure: None,
			raw_status_body: None,
			release_failure: None,
			next_run_session: "run-42".into(),
			requests: Vec::new(),
		}));

		let app = Router::new()
			.route("/api/jobs/{job}/status", get(job_status))
			.route("/api/jobs/{job}/worker/ready", get(worker_ready))
			.route("/api/jobs/{job}/heartbeat", post(heartbeat))
			.route("/api/jobs/{job}/reset", post(reset))
			.route("/api/jobs/{job}", delete(release))
			.with_state(Arc::clone(&inner));

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let _ = axum::serve(listener, app).await;
		});

		Self { inner, addr }
	}

	pub fn base_url(&self) -> String {
		format!("http://{}", self.addr)
	}

	pub fn set_job_status(&self, status: &str) {
		self.inner.lock().job_status = status.into();
	}

	pub fn set_worker(&self, ready: bool, error: Option<&str>) {
		let mut inner = self.inner.lock();
		inner.worker_ready = ready;
		inner.worker_error = error.map(str::to_string);
	}

	pub fn fail_status(&self, code: u16) {
		self.inner.lock().status_failure = Some(code);
	}

	pub fn raw_status_body(&self, body: &str) {
		self.inner.lock().raw_status_body = Some(body.into());
	}

	pub fn fail_release(&self, code: u16) {
		self.inner.lock().release_failure = Some(code);
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.inner.lock().requests.clone()
	}

	pub fn paths(&self, method: &str) -> Vec<String> {
		self.requests().into_iter().filter(|r| r.method == method).map(|r| r.path).collect()
	}
}

fn record(state: &Shared, method: &Method, uri: &Uri, headers: &HeaderMap) {
	let authorization = headers
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.map(str::to_string);
	state.lock().requests.push(Recorded {
		method: method.to_string(),
		path: uri.path().to_string(),
		query: uri.query().map(str::to_string),
		authorization,
	});
}

fn failure(code: u16) -> Response {
	let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	(status, format!("fake failure {code}")).into_response()
}

async fn job_status(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
	record(&state, &method, &uri, &headers);
	let inner = state.lock();
	if let Some(code) = inner.status_failure {
		return failure(code);
	}
	if let Some(body) = &inner.raw_status_body {
		return body.clone().into_response();
	}
	axum::Json(json!({ "status": inner.job_status })).into_response()
}

async fn worker_ready(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
	record(&state, &method, &uri, &headers);
	let inner = state.lock();
	axum::Json(json!({ "ready": inner.worker_ready, "error": inner.worker_error })).into_response()
}

async fn heartbeat(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
	record(&state, &method, &uri, &headers);
	StatusCode::NO_CONTENT.into_response()
}

async fn reset(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
	record(&state, &method, &uri, &headers);
	let inner = state.lock();
	axum::Json(json!({ "run_session_id": inner.next_run_session })).into_response()
}

async fn release(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
	record(&state, &method, &uri, &headers);
	match state.lock().release_failure {
		Some(code) => failure(code),
		None => StatusCode::NO_CONTENT.into_response(),
	}
}
