//! Structured output envelope and payload models.

mod model;
mod result_builder;

pub use model::*;
pub use result_builder::{ResultBuilder, print_result};
