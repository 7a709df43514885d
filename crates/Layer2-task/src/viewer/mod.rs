//! Live log viewer
//!
//! - `debounce.rs` - trailing-edge debouncer shared by the watch loop
//! - `view.rs` - display-ready projection of a log file
//! - `watcher.rs` - file watcher + poll driven subscriptions

mod debounce;
mod view;
mod watcher;

pub use debounce::Debouncer;
pub use view::{build_view, EntryStatus, LogViewEntry, LogViewPayload};
pub use watcher::{LiveLogViewer, ViewerSubscription, ViewerUpdate};
