//! Session configuration with environment overlay.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatConfig;
use crate::tunnel::{DEFAULT_CONNECT_TIMEOUT, ProxyAddress, resolve_proxy_address};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TUNNEL_DEST_HOST: &str = "localhost";

pub const ENV_BASE_URL: &str = "SBX_BASE_URL";
pub const ENV_PROXY_TLS: &str = "SBX_PROXY_TLS";
pub const ENV_HEARTBEAT_SECS: &str = "SBX_HEARTBEAT_SECS";
pub const ENV_TUNNEL_DEST_HOST: &str = "SBX_TUNNEL_DEST_HOST";
pub const ENV_PROXY: &str = "SBX_PROXY";

/// Settings shared by every session created against one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
	/// Deployment base URL; also decides which proxy tunnels go through.
	pub base_url: Url,
	/// Wrap the proxy connection in TLS.
	pub proxy_tls: bool,
	pub heartbeat: HeartbeatConfig,
	/// Host the proxy connects to on the sandbox side.
	pub tunnel_dest_host: String,
	pub connect_timeout: Duration,
	/// Explicit proxy, bypassing resolution from `base_url`.
	pub proxy: Option<ProxyAddress>,
}

impl SandboxConfig {
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			proxy_tls: true,
			heartbeat: HeartbeatConfig::default(),
			tunnel_dest_host: DEFAULT_TUNNEL_DEST_HOST.to_string(),
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			proxy: None,
		}
	}

	/// Parses `base_url` and applies defaults for everything else.
	pub fn parse(base_url: &str) -> Result<Self> {
		let url = Url::parse(base_url).map_err(|err| Error::InvalidConfig(format!("invalid base URL {base_url:?}: {err}")))?;
		Ok(Self::new(url))
	}

	/// Reads `SBX_*` variables from the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Builds a config from an arbitrary key lookup, using the `SBX_*` names.
	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let base_url = lookup(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
		let mut config = Self::parse(&base_url)?;

		if let Some(raw) = lookup(ENV_PROXY_TLS) {
			config.proxy_tls = parse_flag(ENV_PROXY_TLS, &raw)?;
		}
		if let Some(raw) = lookup(ENV_HEARTBEAT_SECS) {
			let secs: u64 = raw
				.trim()
				.parse()
				.map_err(|_| Error::InvalidConfig(format!("{ENV_HEARTBEAT_SECS} must be a whole number of seconds, got {raw:?}")))?;
			if secs == 0 {
				return Err(Error::InvalidConfig(format!("{ENV_HEARTBEAT_SECS} must be positive")));
			}
			config.heartbeat = HeartbeatConfig::from_secs(secs);
		}
		if let Some(host) = lookup(ENV_TUNNEL_DEST_HOST).filter(|host| !host.trim().is_empty()) {
			config.tunnel_dest_host = host.trim().to_string();
		}
		if let Some(raw) = lookup(ENV_PROXY) {
			config.proxy = Some(parse_proxy(&raw)?);
		}
		Ok(config)
	}

	pub fn with_proxy_tls(mut self, proxy_tls: bool) -> Self {
		self.proxy_tls = proxy_tls;
		self
	}

	pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
		self.heartbeat = heartbeat;
		self
	}

	pub fn with_tunnel_dest_host(mut self, host: impl Into<String>) -> Self {
		self.tunnel_dest_host = host.into();
		self
	}

	pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
		self.connect_timeout = connect_timeout;
		self
	}

	pub fn with_proxy(mut self, proxy: ProxyAddress) -> Self {
		self.proxy = Some(proxy);
		self
	}

	/// Proxy that tunnels for this deployment go through.
	pub fn proxy_address(&self) -> Result<ProxyAddress> {
		match &self.proxy {
			Some(proxy) => Ok(proxy.clone()),
			None => resolve_proxy_address(&self.base_url),
		}
	}
}

fn parse_proxy(raw: &str) -> Result<ProxyAddress> {
	let invalid = || Error::InvalidConfig(format!("{ENV_PROXY} must be host:port, got {raw:?}"));
	let (host, port) = raw.trim().rsplit_once(':').ok_or_else(invalid)?;
	let port = port.parse::<u16>().map_err(|_| invalid())?;
	if host.is_empty() {
		return Err(invalid());
	}
	Ok(ProxyAddress::new(host, port))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(Error::InvalidConfig(format!("{key} must be a boolean, got {other:?}"))),
	}
}
