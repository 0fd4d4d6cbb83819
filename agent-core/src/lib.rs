pub mod audit;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod recovery;
pub mod service;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};
