//! `sbx` command-line client.
//!
//! Talks to the sandbox status API over HTTP ([`client::HttpSessionApi`]) and
//! drives sessions through the `sbx` library.

pub mod cli;
pub mod client;
pub mod commands;
pub mod context;
pub mod error;
pub mod logging;
pub mod output;
