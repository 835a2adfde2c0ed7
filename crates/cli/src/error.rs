use sbx::ApiError;
use thiserror::Error;

use crate::output::ErrorCode;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Session(#[from] sbx::Error),

	#[error(transparent)]
	Api(#[from] ApiError),

	#[error("{0}")]
	InvalidInput(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl CliError {
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Session(err) => session_code(err),
			CliError::Api(_) => ErrorCode::ApiError,
			CliError::InvalidInput(_) => ErrorCode::InvalidInput,
			CliError::Io(_) => ErrorCode::IoError,
		}
	}

	/// Readiness phase to report alongside a deadline miss.
	pub fn phase(&self) -> Option<&'static str> {
		match self {
			CliError::Session(err) => err.readiness_phase().map(|phase| phase.as_str()),
			_ => None,
		}
	}
}

fn session_code(err: &sbx::Error) -> ErrorCode {
	use sbx::Error;

	match err {
		Error::ReadinessTimeout { .. } => ErrorCode::Timeout,
		Error::Api(_) | Error::Heartbeat { .. } => ErrorCode::ApiError,
		Error::TunnelProtocol(_)
		| Error::TunnelBind { .. }
		| Error::Relay(_)
		| Error::TunnelAlreadyRunning(_)
		| Error::TunnelStopped
		| Error::Tls(_) => ErrorCode::TunnelError,
		Error::InvalidConfig(_) => ErrorCode::InvalidInput,
		Error::Io(_) => ErrorCode::IoError,
		Error::PortsExhausted { .. } | Error::InvalidState(_) => ErrorCode::SessionError,
	}
}

#[cfg(test)]
mod tests {
	use sbx::ReadinessPhase;

	use super::*;

	#[test]
	fn readiness_timeouts_map_to_timeout() {
		let err = CliError::from(sbx::Error::ReadinessTimeout {
			phase: ReadinessPhase::WorkerHealthy,
			detail: "booting".into(),
		});
		assert_eq!(err.code(), ErrorCode::Timeout);
		assert_eq!(err.phase(), Some("worker_healthy"));
	}

	#[test]
	fn api_failures_keep_their_message() {
		let err = CliError::from(ApiError::Status {
			code: 403,
			message: "forbidden".into(),
		});
		assert_eq!(err.code(), ErrorCode::ApiError);
		assert_eq!(err.phase(), None);
		assert_eq!(err.to_string(), "status API returned 403: forbidden");
	}

	#[test]
	fn tunnel_and_config_codes() {
		assert_eq!(CliError::from(sbx::Error::TunnelStopped).code(), ErrorCode::TunnelError);
		assert_eq!(CliError::from(sbx::Error::InvalidConfig("bad".into())).code(), ErrorCode::InvalidInput);
	}
}
