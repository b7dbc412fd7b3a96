//! Infrastructure layer: job storage, the job queue service, the worker loop
//! and configuration.

pub mod config;
pub mod jobs;

pub use config::{ConfigError, Settings};
