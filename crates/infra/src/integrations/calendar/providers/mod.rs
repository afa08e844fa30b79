//! Provider adapters
//!
//! One [`ProviderAdapter`] per provider: Google Calendar, Outlook (Microsoft
//! Graph) and CalDAV, which serves both iCloud and generic servers.

pub mod caldav;
pub mod google;
pub mod microsoft;

use std::sync::Arc;

use calsync_core::{ProviderAdapter, ProviderRegistry};
use calsync_domain::{CalSyncError, ProvidersConfig, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::info;

pub use caldav::CalDavCalendarAdapter;
pub use google::GoogleCalendarAdapter;
pub use microsoft::OutlookCalendarAdapter;

use crate::http::HttpClient;

/// Upper bound on pages fetched per listing.
pub(crate) const MAX_PAGES: usize = 50;

/// Registry holding an adapter for every configured provider.
pub fn build_registry(config: &ProvidersConfig, http: HttpClient) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if let Some(google) = &config.google {
        registry.register(Arc::new(GoogleCalendarAdapter::new(google, http.clone())));
    }
    if let Some(outlook) = &config.outlook {
        registry.register(Arc::new(OutlookCalendarAdapter::new(outlook, http.clone())));
    }
    if let Some(apple) = &config.apple {
        registry.register(Arc::new(CalDavCalendarAdapter::apple(apple, http.clone())));
    }
    if let Some(caldav) = &config.caldav {
        registry.register(Arc::new(CalDavCalendarAdapter::generic(caldav, http)));
    }

    info!(providers = ?registry.providers(), "provider adapters registered");
    registry
}

/// RFC 3339 instant in UTC.
pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|e| CalSyncError::InvalidInput(format!("invalid timestamp '{raw}': {e}")))
}

/// All-day `YYYY-MM-DD` dates start at UTC midnight.
pub(crate) fn parse_all_day(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| CalSyncError::InvalidInput(format!("invalid date '{raw}': {e}")))
}
