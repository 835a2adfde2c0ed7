//! Sandboxes served from this machine on pooled loopback ports.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use sbx_runtime::{BackoffPolicy, LocalPortPool, PollError, PollOutcome, PortLease, poll_until_ready};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::readiness::ReadinessPhase;

/// A local sandbox holding one port from a shared [`LocalPortPool`].
///
/// The port goes back to the pool on [`LocalSandbox::release`] or drop.
#[derive(Debug)]
pub struct LocalSandbox {
	lease: Option<PortLease>,
	policy: BackoffPolicy,
}

impl LocalSandbox {
	/// Checks a bindable port out of `pool`.
	pub fn acquire(pool: &Arc<LocalPortPool>) -> Result<Self> {
		let lease = pool.checkout().ok_or(Error::PortsExhausted { capacity: pool.capacity() })?;
		debug!(target = "sbx.local", port = lease.port(), available = pool.available(), "local port checked out");
		Ok(Self {
			lease: Some(lease),
			policy: BackoffPolicy::ASYNC_READINESS,
		})
	}

	pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Port held by this sandbox, `None` once released.
	pub fn port(&self) -> Option<u16> {
		self.lease.as_ref().map(PortLease::port)
	}

	pub fn addr(&self) -> Option<SocketAddr> {
		self.port().map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
	}

	/// Polls until something accepts connections on the sandbox port.
	pub async fn wait_until_listening(&self, timeout: Duration) -> Result<()> {
		let addr = self
			.addr()
			.ok_or_else(|| Error::InvalidState("local sandbox port was already released".to_string()))?;
		let deadline = Instant::now() + timeout;

		let attempts = poll_until_ready(self.policy, Some(deadline), move || async move {
			Ok::<_, Infallible>(match TcpStream::connect(addr).await {
				Ok(_) => PollOutcome::Ready,
				Err(err) => PollOutcome::NotReady(format!("{addr}: {err}")),
			})
		})
		.await
		.map_err(|err| match err {
			PollError::TimedOut { last_detail, .. } => Error::ReadinessTimeout {
				phase: ReadinessPhase::WorkerHealthy,
				detail: last_detail.unwrap_or_else(|| format!("nothing listening on {addr}")),
			},
			PollError::Query(never) => match never {},
		})?;

		info!(target = "sbx.local", %addr, attempts, "local sandbox listening");
		Ok(())
	}

	/// Returns the port to the pool. Idempotent.
	pub fn release(&mut self) {
		if let Some(lease) = self.lease.take() {
			debug!(target = "sbx.local", port = lease.port(), "local port released");
		}
	}
}
