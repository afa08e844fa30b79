//! Calendar provider integrations
//!
//! Provider adapters for Google Calendar, Outlook and CalDAV (iCloud and
//! generic servers), the OAuth token exchange they share, the iCalendar
//! mapping used by CalDAV, and inbound push-notification parsing.

pub(crate) mod errors;
pub mod ics;
pub mod notifications;
pub mod oauth;
pub mod providers;

pub use notifications::{
    google_notice, outlook_notices, ChannelNotice, NotificationRouter, RouteReport,
};
pub use oauth::{
    extract_email_from_id_token, AuthorizationRequest, AuthorizedAccount, OAuthSettings,
    OAuthTokenClient,
};
pub use providers::{
    build_registry, CalDavCalendarAdapter, GoogleCalendarAdapter, OutlookCalendarAdapter,
};
