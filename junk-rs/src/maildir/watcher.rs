//! Arrival notifications for a Maildir's `new/` directory

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::mail_id;
use crate::error::Result;

/// A mail that appeared in `new/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    pub id: String,
}

/// Watches `new/` and forwards arrivals over a bounded channel.
///
/// Dropping the watcher closes the channel.
pub struct MaildirWatcher {
    _watcher: RecommendedWatcher,
    watch_path: PathBuf,
}

impl MaildirWatcher {
    pub fn new(new_dir: &Path, capacity: usize) -> Result<(Self, mpsc::Receiver<Arrival>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for id in arrivals(&event) {
                        // Runs on the watcher's own thread, outside the runtime
                        if tx.blocking_send(Arrival { id }).is_err() {
                            debug!("Arrival channel closed, dropping event");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Watcher error: {}", e),
            },
            Config::default(),
        )?;

        watcher.watch(new_dir, RecursiveMode::NonRecursive)?;

        Ok((
            Self {
                _watcher: watcher,
                watch_path: new_dir.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn watch_path(&self) -> &Path {
        &self.watch_path
    }
}

/// Mail ids created in or renamed into the watched directory
fn arrivals(event: &Event) -> Vec<String> {
    let paths: &[PathBuf] = match event.kind {
        EventKind::Create(_) => event.paths.as_slice(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => {
            event.paths.as_slice()
        }
        // [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1..).unwrap_or_default()
        }
        _ => return Vec::new(),
    };

    paths
        .iter()
        .filter(|path| path.is_file())
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy())
        .filter(|name| !name.starts_with('.'))
        .map(|name| mail_id(&name).to_string())
        .collect()
}
