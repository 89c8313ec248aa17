//! Maildir access
//!
//! - [`source`]: listing, loading and filing mails
//! - [`watcher`]: arrival events for `new/`

pub mod source;
pub mod watcher;

pub use source::{Folder, MailEntry, MailSource, MaildirSource, RawMail};
pub use watcher::{Arrival, MaildirWatcher};

/// Maildir unique name of a file: everything before the first `:`
pub fn mail_id(file_name: &str) -> &str {
    file_name.split(':').next().unwrap_or(file_name)
}
