//! OAuth token lifecycle

mod service;

pub use service::TokenLifecycleManager;
