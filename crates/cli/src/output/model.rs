use serde::{Deserialize, Serialize};

/// Current schema version for command output.
pub const SCHEMA_VERSION: u32 = 1;

/// The result envelope printed by every command.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	pub schema_version: u32,
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
}

/// Error information for failed commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub phase: Option<String>,
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	Timeout,
	ApiError,
	TunnelError,
	SessionError,
	InvalidInput,
	IoError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::Timeout => write!(f, "TIMEOUT"),
			ErrorCode::ApiError => write!(f, "API_ERROR"),
			ErrorCode::TunnelError => write!(f, "TUNNEL_ERROR"),
			ErrorCode::SessionError => write!(f, "SESSION_ERROR"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::IoError => write!(f, "IO_ERROR"),
		}
	}
}

/// Payload of `sbx status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
	pub job_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub run_session_id: Option<String>,
	pub job_status: String,
	pub worker_ready: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub worker_detail: Option<String>,
}

/// Payload of `sbx wait`, `sbx reset` and `sbx release`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
	pub job_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub run_session_id: Option<String>,
	pub state: String,
}

/// Payload printed once `sbx tunnel` is listening.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelData {
	pub job_id: String,
	pub local_port: u16,
	pub dest_port: u16,
	pub proxy: String,
}
