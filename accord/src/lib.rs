//! Accord
//!
//! Backup and restore orchestrator for Anaconda Enterprise 5 clusters:
//! database dumps, storage archives, cluster secrets and an optional
//! mirror to a standby node.

pub mod catalog;
pub mod config;
pub mod context;
pub mod executor;
pub mod fs;
pub mod gateway;
pub mod poll;
pub mod signal;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::PlatformConfig;
pub use context::{Action, BackupContext, ContextOptions};
pub use gateway::{Gateway, SystemGateway};
pub use utils::errors::AccordError;
pub type Result<T> = std::result::Result<T, AccordError>;
