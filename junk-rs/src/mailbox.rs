//! One Maildir together with its statistics store

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bayes::{BayesianClassifier, Class, Classification, Stats};
use crate::config::StoreConfig;
use crate::error::{JunkError, Result};
use crate::lifecycle::{CycleReport, MailLifecycle, Transition};
use crate::maildir::{MailSource, MaildirSource};
use crate::store::StatsStore;
use crate::tokenizer::Tokenizer;

pub struct Mailbox {
    source: MaildirSource,
    store: StatsStore,
    tokenizer: Tokenizer,
    backup_path: PathBuf,
    /// Serializes filing decisions between the bulk and watch tasks
    filing: Mutex<()>,
}

impl Mailbox {
    /// Open a Maildir and its store, creating whatever is missing
    pub async fn open(root: &Path, config: &StoreConfig) -> Result<Self> {
        let source = MaildirSource::open(root).await?;
        let store = StatsStore::open(&root.join(&config.file_name), config).await?;

        Ok(Self {
            source,
            store,
            tokenizer: Tokenizer::new()?,
            backup_path: root.join(&config.backup_file_name),
            filing: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        self.source.root()
    }

    pub fn new_dir(&self) -> PathBuf {
        self.source.new_dir()
    }

    pub fn store(&self) -> &StatsStore {
        &self.store
    }

    pub fn lifecycle(&self) -> MailLifecycle<'_> {
        MailLifecycle::new(&self.store, &self.source, &self.tokenizer, &self.filing)
    }

    /// Learn a mail under `class`, moving it into the matching folder
    pub async fn learn(&self, id: &str, class: Class) -> Result<()> {
        self.lifecycle().learn_as(id, class).await
    }

    /// Classify a mail without moving or learning it
    pub async fn classify(&self, id: &str) -> Result<Classification> {
        let words = self.words(id).await?;
        BayesianClassifier::new(&self.store).classify(&words).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        self.store.stats().await
    }

    /// Export the store to the backup file next to it
    pub async fn backup(&self) -> Result<u64> {
        self.store.backup(&self.backup_path).await
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Bulk pass over every mail of the Maildir
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.lifecycle().run_cycle(cancel).await
    }

    /// Handle a mail that just appeared in `new/`
    pub async fn on_arrival(&self, id: &str) -> Result<Transition> {
        self.lifecycle().classify_new(id).await
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn words(&self, id: &str) -> Result<Vec<String>> {
        let mail = self.source.load(id).await?;
        Ok(self.tokenizer.tokenize(&mail.subject, &mail.body))
    }
}

/// Every opened mailbox, shared by the orchestration tasks
#[derive(Default)]
pub struct MailboxRegistry {
    mailboxes: Vec<Arc<Mailbox>>,
}

impl MailboxRegistry {
    /// Open every Maildir. A Maildir whose store cannot be opened is
    /// logged and left out; having none at all is an error.
    pub async fn open_all(roots: &[PathBuf], config: &StoreConfig) -> Result<Self> {
        let mut registry = Self::default();

        for root in roots {
            match Mailbox::open(root, config).await {
                Ok(mailbox) => registry.insert(mailbox),
                Err(e) => error!("Failed to open mailbox {}: {}", root.display(), e),
            }
        }

        if registry.is_empty() {
            return Err(JunkError::Config("No mailbox could be opened".to_string()));
        }

        info!("Opened {} mailbox(es)", registry.len());
        Ok(registry)
    }

    pub fn insert(&mut self, mailbox: Mailbox) {
        self.mailboxes.push(Arc::new(mailbox));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mailbox>> {
        self.mailboxes.iter()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    pub async fn close_all(&self) {
        for mailbox in &self.mailboxes {
            mailbox.close().await;
        }
    }
}
