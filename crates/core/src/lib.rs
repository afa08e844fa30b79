//! # Calsync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for persistence and provider access
//! - Token lifecycle, webhook subscription, sync, conflict and availability
//!   services
//!
//! ## Architecture Principles
//! - Only depends on `calsync-common` and `calsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod availability;
pub mod conflict;
pub mod connection;
pub mod provider;
pub mod sync;
pub mod token;
pub mod webhook;

pub use availability::AvailabilityAggregator;
pub use conflict::ConflictResolver;
pub use connection::ports::{CalendarRepository, ConnectionRepository, CredentialRepository};
pub use connection::{ConnectionService, NewConnection};
pub use provider::{AuthContext, ChangeQuery, ProviderAdapter, ProviderRegistry};
pub use sync::ports::{ConflictRepository, EventRepository};
pub use sync::{LocalEventEditor, SyncEngine, SyncSettings};
pub use token::TokenLifecycleManager;
pub use webhook::ports::SubscriptionRepository;
pub use webhook::WebhookSubscriptionManager;
