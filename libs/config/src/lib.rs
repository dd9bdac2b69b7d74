//! # Ambit Node Configuration
//!
//! Centralized configuration for Ambit nodes and the tracing setup used by
//! binaries.
//!
//! ## Usage
//!
//! ```no_run
//! use node_config::{init_tracing, RuntimeConfig};
//!
//! let config = RuntimeConfig::load(Some(std::path::Path::new("config/node.toml")))?;
//! init_tracing(&config.logging)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod logging;
pub mod runtime_config;

pub use logging::init_tracing;
pub use runtime_config::{
    LoggingSettings, NodeSettings, RuntimeConfig, SchedulerSettings, TransmissionSettings, ENV_PREFIX,
};
