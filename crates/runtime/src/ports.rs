//! Loopback port bookkeeping shared by every local sandbox in the process.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Returns `true` when `port` can be bound on localhost.
pub fn port_available(port: u16) -> bool {
	std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Set of loopback ports handed out to local sandboxes.
///
/// Every read and write goes through one mutex, and the lock is never held
/// across socket operations.
#[derive(Debug)]
pub struct LocalPortPool {
	available: Mutex<BTreeSet<u16>>,
	capacity: usize,
}

impl LocalPortPool {
	/// Creates a pool owning every port in `range`.
	pub fn new(range: RangeInclusive<u16>) -> Arc<Self> {
		let available: BTreeSet<u16> = range.collect();
		Arc::new(Self {
			capacity: available.len(),
			available: Mutex::new(available),
		})
	}

	/// Total number of ports the pool was created with.
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Number of ports not currently checked out.
	pub fn available(&self) -> usize {
		self.available.lock().len()
	}

	/// Checks out the lowest free port that can actually be bound.
	///
	/// Ports that fail the bind probe stay in the pool for a later caller.
	/// Returns `None` when no pooled port is currently usable.
	pub fn checkout(self: &Arc<Self>) -> Option<PortLease> {
		let mut rejected = Vec::new();
		let lease = loop {
			let Some(port) = self.take_lowest() else {
				break None;
			};
			if port_available(port) {
				break Some(PortLease {
					pool: Arc::clone(self),
					port,
				});
			}
			debug!(target = "sbx.ports", port, "pooled port is bound elsewhere; skipping");
			rejected.push(port);
		};

		if !rejected.is_empty() {
			self.available.lock().extend(rejected);
		}
		lease
	}

	/// Returns `port` to the pool. Releasing a port that is already pooled is a no-op.
	pub fn release(&self, port: u16) {
		let inserted = self.available.lock().insert(port);
		if !inserted {
			debug!(target = "sbx.ports", port, "port already in pool");
		}
	}

	fn take_lowest(&self) -> Option<u16> {
		self.available.lock().pop_first()
	}
}

/// A checked-out port; returns itself to the pool on drop.
#[derive(Debug)]
pub struct PortLease {
	pool: Arc<LocalPortPool>,
	port: u16,
}

impl PortLease {
	pub fn port(&self) -> u16 {
		self.port
	}
}

impl Drop for PortLease {
	fn drop(&mut self) {
		self.pool.release(self.port);
	}
}
