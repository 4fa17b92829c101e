pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod graph;
pub mod hotspot;
pub mod identity;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod profile;

pub use error::{RepographError, Result};
