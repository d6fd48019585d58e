// Public modules
pub mod bootstrap;
pub mod dependency;
pub mod error;
pub mod migration;
pub mod patcher;
pub mod secrets;
pub mod state;
pub mod step;
pub mod workflow;

// Public modules for CLI access
pub mod defaults;
pub mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
