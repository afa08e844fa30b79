//! Bidirectional sync between the local mirror and provider calendars

pub mod diff;
pub mod ports;

mod editor;
mod engine;

pub use editor::LocalEventEditor;
pub use engine::{SyncEngine, SyncSettings};
