//! junk-rs: Maildir junk mail filter
//!
//! Classifies incoming mail as good or junk with a Naive-Bayes model whose
//! word statistics are kept as HyperLogLog counters of distinct mail ids,
//! one SQLite store per Maildir.
//!
//! # Features
//!
//! - **Live filtering**: mails arriving in `new/` are classified at once and
//!   junk is filed into `.Junk/cur`
//! - **Learning from the user**: mails the user files or moves between
//!   `cur/` and `.Junk/cur` are (re)learned on every bulk cycle
//! - **Bounded storage**: counters have a fixed size whatever the mail volume
//! - **Backups**: a consistent copy of each store after every bulk cycle
//!
//! # Example
//!
//! ```no_run
//! use junk_rs::config::StoreConfig;
//! use junk_rs::mailbox::Mailbox;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mailbox = Mailbox::open(Path::new("/home/alice/Maildir"), &StoreConfig::default()).await?;
//!
//!     let verdict = mailbox.classify("1488226337.M327822P8269.host").await?;
//!     println!("junk: {} ({:.2})", verdict.is_junk, verdict.junk_probability());
//!
//!     mailbox.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`sketch`]: Approximate distinct counters
//! - [`store`]: Per-Maildir statistics store
//! - [`bayes`]: Priors, likelihoods and classification
//! - [`tokenizer`]: Word extraction
//! - [`maildir`]: Maildir listing, loading, filing and watching
//! - [`lifecycle`]: Learn / classify decisions for one mail
//! - [`mailbox`]: A Maildir with its store
//! - [`daemon`]: Bulk and live loops across mailboxes
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling

pub mod bayes;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod mailbox;
pub mod maildir;
pub mod sketch;
pub mod store;
pub mod tokenizer;

// Re-export commonly used types
pub use bayes::{Class, Classification, Stats};
pub use config::Config;
pub use error::{JunkError, Result};
pub use mailbox::{Mailbox, MailboxRegistry};
