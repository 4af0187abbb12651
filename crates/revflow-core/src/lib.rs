pub mod agent;
pub mod concurrency;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod mergequeue;
pub mod orchestrator;
pub mod persistence;
pub mod provider;
pub mod remediation;
pub mod session;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::*;
