//! Utility modules for the orchestrator.

pub mod errors;
pub mod logger;

pub use errors::{AccordError, ErrorKind, Result};
