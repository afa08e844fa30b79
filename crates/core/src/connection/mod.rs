//! Connections, per-calendar settings and stored credentials

pub mod ports;
pub mod service;

pub use service::{ConnectionService, NewConnection};
