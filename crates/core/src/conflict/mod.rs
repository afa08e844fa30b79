//! Conflict listing and resolution

mod service;

pub use service::ConflictResolver;
