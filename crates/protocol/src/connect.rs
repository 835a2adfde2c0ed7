//! HTTP CONNECT handshake codec.
//!
//! The request is ASCII and CRLF-terminated:
//!
//! ```text
//! CONNECT <host>:<port> HTTP/1.1
//! Host: <host>:<port>
//! Proxy-Authorization: Basic <base64(user:pass)>     (only with a credential)
//! Proxy-Connection: keep-alive
//! Connection: keep-alive
//!
//! ```
//!
//! A response is accepted only when the second whitespace-delimited token of
//! its status line is exactly `200`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Upper bound on the size of a CONNECT response head.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Username/password pair sent as `Proxy-Authorization: Basic`.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredential {
	pub username: String,
	pub password: String,
}

impl BasicCredential {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
		}
	}

	/// Returns the `Basic` token value (without the scheme prefix).
	pub fn token(&self) -> String {
		STANDARD.encode(format!("{}:{}", self.username, self.password))
	}
}

impl std::fmt::Debug for BasicCredential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BasicCredential")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// A CONNECT request for one destination.
#[derive(Debug, Clone)]
pub struct ConnectRequest<'a> {
	pub dest_host: &'a str,
	pub dest_port: u16,
	pub credential: Option<&'a BasicCredential>,
}

impl ConnectRequest<'_> {
	/// Serializes the request head.
	pub fn encode(&self) -> Vec<u8> {
		let authority = format!("{}:{}", self.dest_host, self.dest_port);
		let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
		if let Some(credential) = self.credential {
			head.push_str("Proxy-Authorization: Basic ");
			head.push_str(&credential.token());
			head.push_str("\r\n");
		}
		head.push_str("Proxy-Connection: keep-alive\r\nConnection: keep-alive\r\n\r\n");
		head.into_bytes()
	}
}

/// Rejected CONNECT response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectStatusError {
	/// The status line did not carry `200`. Holds the status line verbatim.
	#[error("proxy refused CONNECT: {0}")]
	Rejected(String),
	/// The response head was not terminated within [`MAX_RESPONSE_HEAD`] bytes.
	#[error("proxy response head exceeds {MAX_RESPONSE_HEAD} bytes")]
	HeadTooLarge,
}

/// Returns the index one past the `\r\n\r\n` that terminates the response head.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
	buf.windows(HEAD_TERMINATOR.len())
		.position(|window| window == HEAD_TERMINATOR)
		.map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Returns the first line of a response head, without its line ending.
pub fn status_line(head: &[u8]) -> String {
	let end = head.iter().position(|b| *b == b'\r' || *b == b'\n').unwrap_or(head.len());
	String::from_utf8_lossy(&head[..end]).into_owned()
}

/// Accepts a response head whose status code token is exactly `200`.
pub fn parse_status(head: &[u8]) -> Result<(), ConnectStatusError> {
	let line = status_line(head);
	match line.split_whitespace().nth(1) {
		Some("200") => Ok(()),
		_ => Err(ConnectStatusError::Rejected(line)),
	}
}
