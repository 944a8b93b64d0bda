#![forbid(unsafe_code)]

#[cfg(not(unix))]
compile_error!("fleetwire relies on unix pipes and signals");

pub mod agent;
pub mod capture;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod orchestrator;
pub mod protocol;

pub use config::FleetConfig;
pub use errors::{AppError, Result};
