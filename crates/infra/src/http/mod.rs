//! Shared HTTP client for provider adapters

pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
