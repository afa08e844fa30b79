//! # Calsync Domain
//!
//! Domain model for the calendar synchronization service.
//!
//! This crate contains:
//! - Connection, credential, subscription, event and conflict types
//! - The error taxonomy (`CalSyncError`) and `Result` alias
//! - Configuration structures and validation
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other Calsync crates
//! - Only external dependencies allowed
//! - Pure data structures plus small invariant-preserving helpers

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
