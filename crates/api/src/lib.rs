//! # Calsync API
//!
//! Service layer - application context, HTTP surface and entry point.
//!
//! This crate contains:
//! - The application context (dependency injection)
//! - Inbound webhook endpoints for Google and Outlook
//! - The operator surface: connections, manual sync, conflicts, availability
//! - Logging bootstrap and health reporting
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core`, and `infra`
//! - Wires up the hexagonal architecture
//! - Handlers stay thin: parse, call one service, map the result

pub mod context;
pub mod error;
pub mod routes;
pub mod utils;

pub use context::AppContext;
pub use error::ApiError;
pub use routes::router;
