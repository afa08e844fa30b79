//! Provider access port and dispatch

mod ports;
mod registry;

pub use ports::{AuthContext, ChangeQuery, ProviderAdapter};
pub use registry::ProviderRegistry;
