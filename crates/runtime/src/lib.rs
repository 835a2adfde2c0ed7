//! Execution primitives for the sandbox control plane.
//!
//! Both concurrency models (tokio tasks and dedicated threads) share the
//! definitions in this crate so their retry behavior cannot drift:
//!
//! * [`backoff`]: policy, outcome and the [`Poller`] state machine
//! * [`poll`]: the async and blocking drivers for a [`Poller`]
//! * [`ports`]: the shared [`LocalPortPool`] and loopback probing

pub mod backoff;
pub mod poll;
pub mod ports;

pub use backoff::{BackoffPolicy, PollOutcome, Poller};
pub use poll::{PollError, poll_until_ready, poll_until_ready_blocking};
pub use ports::{LocalPortPool, PortLease, port_available};
