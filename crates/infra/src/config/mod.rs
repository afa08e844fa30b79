//! Configuration loading
//!
//! Loads service configuration from environment variables and files, and
//! resolves the database encryption key.

pub mod loader;

pub use loader::{find_config_file, load, load_from_env, load_from_file};
