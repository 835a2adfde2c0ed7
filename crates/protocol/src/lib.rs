//! Wire types for the sandbox control plane.
//!
//! This crate contains the data shapes exchanged with the two remote parties
//! a session talks to: the status API (response bodies, consumed fields only)
//! and the upstream proxy (the HTTP CONNECT handshake, bit-exact).
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: no sockets, no clocks, no retries
//! * Minimal: only the fields the control plane actually reads
//! * Stable: changes only when a remote contract changes
//!
//! Session orchestration is built on top of these types in `sbx-rs`.

pub mod connect;
pub mod status;

pub use connect::*;
pub use status::*;
