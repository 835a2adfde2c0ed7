//! Client-side control plane for remote sandbox sessions.
//!
//! A [`SessionHandle`] owns one remotely provisioned sandbox:
//!
//! 1. [`SessionHandle::wait_for_ready`] polls the status API until the job is
//!    running and its worker is healthy, both against one deadline.
//! 2. Once ready, a [`HeartbeatKeeper`] keeps the session from being reaped.
//! 3. [`SessionHandle::start_db_tunnel`] exposes a port inside the sandbox on
//!    loopback through the deployment's HTTP CONNECT proxy.
//! 4. [`SessionHandle::close`] stops the heartbeat and tunnel, then releases
//!    the session.
//!
//! The status API is consumed through the [`SessionApi`] trait. Callers
//! without a tokio runtime use [`blocking::SessionHandle`] instead.
//!
//! # Example
//!
//! ```ignore
//! let config = SandboxConfig::from_env()?;
//! let mut session = SessionHandle::create(api, SessionIds::new("job-42"), config);
//! session.wait_for_ready(Some(Duration::from_secs(120))).await?;
//! let port = session.start_db_tunnel(5432, None).await?;
//! println!("postgres://localhost:{port}/app");
//! session.close().await;
//! ```

pub mod api;
pub mod blocking;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod local;
pub mod readiness;
pub mod session;
pub mod testing;
pub mod tunnel;

pub use api::{ApiError, SessionApi};
pub use config::SandboxConfig;
pub use error::{Error, Result};
pub use heartbeat::{HeartbeatConfig, HeartbeatKeeper};
pub use local::LocalSandbox;
pub use readiness::{ReadinessController, ReadinessPhase};
pub use sbx_protocol as protocol;
pub use sbx_runtime::{BackoffPolicy, LocalPortPool, PollOutcome};
pub use session::{SessionHandle, SessionIds, SessionState};
pub use tunnel::{ProxyAddress, ProxyCredential, TunnelEndpoint, TunnelRelay, resolve_proxy_address};
