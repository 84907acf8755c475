//! TFACC common library
//!
//! This crate contains the error type, configuration and metrics shared by the
//! TFACC wire definitions and the host client.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::TfaccConfig;
pub use error::{Result, TfaccError};
pub use metrics::{LatencyTimer, MetricsRegistry, METRICS};
