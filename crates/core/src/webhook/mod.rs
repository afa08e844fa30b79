//! Push subscription lifecycle

pub mod ports;
mod service;

pub use service::WebhookSubscriptionManager;
