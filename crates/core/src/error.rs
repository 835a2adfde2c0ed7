//! Error types for session control.

use std::net::SocketAddr;

use thiserror::Error;

use crate::api::ApiError;
use crate::readiness::ReadinessPhase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// A readiness phase ran past the shared deadline.
	#[error("{}", .phase.timeout_message(.detail))]
	ReadinessTimeout { phase: ReadinessPhase, detail: String },

	/// The proxy rejected the CONNECT request or hung up before answering.
	#[error("tunnel protocol error: {0}")]
	TunnelProtocol(String),

	/// The local listener could not be bound.
	#[error("failed to bind tunnel listener on {addr}: {source}")]
	TunnelBind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	/// I/O failure while pumping bytes for one tunnel connection.
	#[error("connection relay failed: {0}")]
	Relay(#[source] std::io::Error),

	/// A heartbeat could not be delivered. Logged by the keeper, never returned.
	#[error("heartbeat for {job_id} failed: {source}")]
	Heartbeat {
		job_id: String,
		#[source]
		source: ApiError,
	},

	#[error("a tunnel is already running on local port {0}")]
	TunnelAlreadyRunning(u16),

	#[error("tunnel relay was stopped and cannot be restarted")]
	TunnelStopped,

	#[error("all {capacity} pooled local ports are in use")]
	PortsExhausted { capacity: usize },

	#[error("invalid session state: {0}")]
	InvalidState(String),

	#[error(transparent)]
	Api(#[from] ApiError),

	#[error("TLS error: {0}")]
	Tls(String),

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns `true` for readiness deadline failures.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::ReadinessTimeout { .. })
	}

	/// Readiness phase that timed out, if any.
	pub fn readiness_phase(&self) -> Option<ReadinessPhase> {
		match self {
			Error::ReadinessTimeout { phase, .. } => Some(*phase),
			_ => None,
		}
	}
}
