use std::time::Instant;

use serde::Serialize;

use crate::output::model::{CommandError, CommandResult, ErrorCode, SCHEMA_VERSION};

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
	duration_ms: Option<u64>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
			duration_ms: None,
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			phase: None,
		});
		self
	}

	/// Readiness phase that was in progress when the command failed.
	pub fn phase(mut self, phase: impl Into<String>) -> Self {
		if let Some(error) = self.error.as_mut() {
			error.phase = Some(phase.into());
		}
		self
	}

	pub fn duration_ms(mut self, duration_ms: u64) -> Self {
		self.duration_ms = Some(duration_ms);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		let duration_ms = self.duration_ms.unwrap_or_else(|| self.start_time.elapsed().as_millis() as u64);

		CommandResult {
			schema_version: SCHEMA_VERSION,
			ok,
			command: self.command,
			data: self.data,
			error: self.error,
			duration_ms: Some(duration_ms),
		}
	}
}

/// Print a command result to stdout as a single JSON line.
pub fn print_result<T: Serialize>(result: &CommandResult<T>) {
	if let Ok(json) = serde_json::to_string(result) {
		println!("{json}");
	}
}
