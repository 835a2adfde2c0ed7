use std::sync::Arc;

use sbx::{SandboxConfig, SessionApi, SessionHandle, SessionIds};
use url::Url;

use crate::client::HttpSessionApi;
use crate::error::{CliError, Result};

pub const ENV_API_KEY: &str = "SBX_API_KEY";

/// Configuration and collaborators shared by every command.
pub struct CommandContext {
	pub config: SandboxConfig,
	pub api: Arc<HttpSessionApi>,
}

impl CommandContext {
	/// Layers CLI flags over the `SBX_*` environment.
	pub fn new(base_url: Option<&str>, api_key: Option<String>, no_proxy_tls: bool) -> Result<Self> {
		let mut config = SandboxConfig::from_env()?;
		if let Some(base_url) = base_url {
			config.base_url = Url::parse(base_url).map_err(|err| CliError::InvalidInput(format!("invalid --base-url {base_url:?}: {err}")))?;
		}
		if no_proxy_tls {
			config.proxy_tls = false;
		}

		let api_key = api_key.or_else(|| std::env::var(ENV_API_KEY).ok()).filter(|key| !key.is_empty());
		let api = HttpSessionApi::new(config.base_url.clone(), api_key)?;
		Ok(Self {
			config,
			api: Arc::new(api),
		})
	}

	pub fn session(&self, ids: SessionIds) -> SessionHandle {
		let api: Arc<dyn SessionApi> = self.api.clone();
		SessionHandle::create(api, ids, self.config.clone())
	}
}
