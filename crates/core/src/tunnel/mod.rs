//! In-process database tunnel through the session's upstream proxy.
//!
//! A [`TunnelRelay`] listens on loopback and, for every accepted client,
//! opens an HTTP CONNECT tunnel through the proxy to one fixed destination
//! inside the sandbox, then pumps bytes both ways until either side closes.

use std::time::Duration;

use sbx_protocol::BasicCredential;
use url::Url;

use crate::error::{Error, Result};
use crate::session::SessionIds;

pub mod handshake;
mod relay;

pub use relay::{Transfer, TunnelRelay};

/// Proxy port used when the base URL points at a local development stack.
pub const LOCAL_PROXY_PORT: u16 = 8889;
/// Label prepended to the deployment host to reach its proxy.
pub const PROXY_SUBDOMAIN: &str = "proxy";
/// Proxy port for deployed environments.
pub const PROXY_TLS_PORT: u16 = 443;
/// Bound on establishing the proxy connection, separate from readiness timeouts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Idle time before TCP keepalive probes start on proxy sockets.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
/// Largest single read forwarded in either direction.
pub const RELAY_CHUNK_SIZE: usize = 64 * 1024;

/// Credential presented to the proxy. Held only while a tunnel is open.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredential(BasicCredential);

impl ProxyCredential {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self(BasicCredential::new(username, password))
	}

	/// Username is the job id; password is the run-session id, or the job id
	/// again before the first reset.
	pub fn for_session(ids: &SessionIds) -> Self {
		let password = ids.run_session_id.as_deref().unwrap_or(&ids.job_id);
		Self::new(ids.job_id.clone(), password)
	}

	pub fn basic(&self) -> &BasicCredential {
		&self.0
	}
}

impl std::fmt::Debug for ProxyCredential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

/// Host and port of the upstream CONNECT proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddress {
	pub host: String,
	pub port: u16,
}

impl ProxyAddress {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self { host: host.into(), port }
	}
}

impl std::fmt::Display for ProxyAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

/// Maps a deployment base URL to its proxy.
///
/// Loopback hosts map to `127.0.0.1:8889`; anything else maps to
/// `proxy.<host>:443`.
pub fn resolve_proxy_address(base_url: &Url) -> Result<ProxyAddress> {
	let host = base_url
		.host_str()
		.filter(|host| !host.is_empty())
		.ok_or_else(|| Error::InvalidConfig(format!("base URL has no host: {base_url}")))?;

	if is_local_host(host) {
		return Ok(ProxyAddress::new("127.0.0.1", LOCAL_PROXY_PORT));
	}
	Ok(ProxyAddress::new(format!("{PROXY_SUBDOMAIN}.{host}"), PROXY_TLS_PORT))
}

fn is_local_host(host: &str) -> bool {
	matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1" | "0.0.0.0") || host.ends_with(".localhost")
}

/// Everything one tunnel needs to know about where bytes go.
///
/// `local_port == 0` asks the OS for an ephemeral port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
	pub local_port: u16,
	pub proxy_host: String,
	pub proxy_port: u16,
	pub dest_host: String,
	pub dest_port: u16,
	pub use_tls_to_proxy: bool,
	/// Deadline for connect, TLS and the CONNECT exchange of one connection.
	pub connect_timeout: Duration,
}

impl TunnelEndpoint {
	pub fn new(proxy: ProxyAddress, dest_host: impl Into<String>, dest_port: u16) -> Self {
		Self {
			local_port: 0,
			proxy_host: proxy.host,
			proxy_port: proxy.port,
			dest_host: dest_host.into(),
			dest_port,
			use_tls_to_proxy: true,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
		}
	}

	pub fn with_local_port(mut self, local_port: Option<u16>) -> Self {
		self.local_port = local_port.unwrap_or(0);
		self
	}

	pub fn with_tls(mut self, use_tls_to_proxy: bool) -> Self {
		self.use_tls_to_proxy = use_tls_to_proxy;
		self
	}

	pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
		self.connect_timeout = connect_timeout;
		self
	}

	pub fn proxy(&self) -> ProxyAddress {
		ProxyAddress::new(self.proxy_host.clone(), self.proxy_port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn resolve(url: &str) -> ProxyAddress {
		resolve_proxy_address(&Url::parse(url).unwrap()).unwrap()
	}

	#[test]
	fn local_urls_map_to_fixed_port() {
		for url in ["http://localhost:8000", "http://127.0.0.1", "http://[::1]:3000/api", "http://app.localhost"] {
			assert_eq!(resolve(url), ProxyAddress::new("127.0.0.1", LOCAL_PROXY_PORT), "{url}");
		}
	}

	#[test]
	fn deployed_urls_get_proxy_subdomain() {
		assert_eq!(resolve("https://sandbox.example.com"), ProxyAddress::new("proxy.sandbox.example.com", 443));
		assert_eq!(resolve("https://eu.example.dev:8443/v1"), ProxyAddress::new("proxy.eu.example.dev", 443));
	}

	#[test]
	fn url_without_host_is_rejected() {
		let err = resolve_proxy_address(&Url::parse("unix:/run/api.sock").unwrap()).unwrap_err();
		assert!(matches!(err, Error::InvalidConfig(_)));
	}

	#[test]
	fn credential_falls_back_to_job_id() {
		let fresh = ProxyCredential::for_session(&SessionIds::new("job-1"));
		assert_eq!(fresh.basic().token(), BasicCredential::new("job-1", "job-1").token());

		let reset = ProxyCredential::for_session(&SessionIds::new("job-1").with_run_session("run-7"));
		assert_eq!(reset.basic().token(), "am9iLTE6cnVuLTc=");
		assert!(!format!("{reset:?}").contains("run-7"));
	}

	#[test]
	fn endpoint_defaults() {
		let endpoint = TunnelEndpoint::new(ProxyAddress::new("proxy.example.com", 443), "localhost", 5432);
		assert_eq!(endpoint.local_port, 0);
		assert!(endpoint.use_tls_to_proxy);
		assert_eq!(endpoint.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
		assert_eq!(endpoint.with_local_port(Some(15432)).local_port, 15432);
	}
}
