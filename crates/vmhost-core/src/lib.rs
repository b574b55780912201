// vmhost-core: error type, config, naming, task sequencing, logging
// No internal vmhost dependencies; this is the foundation crate.

pub mod config;
pub mod error;
pub mod naming;
pub mod observability;
pub mod task;

pub use error::{Error, Result};
