use async_trait::async_trait;
use mail_parser::MessageParser;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::mail_id;
use crate::bayes::Class;
use crate::error::{JunkError, Result};

/// Maildir folders the filter looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Folder {
    /// `new/`: delivered, not yet seen by the filter or the mail client
    New,
    /// `cur/`: filed as good
    Cur,
    /// `.Junk/cur/` (and `.Junk/new/`): filed as junk
    Junk,
}

impl Folder {
    pub const ALL: [Folder; 3] = [Folder::New, Folder::Cur, Folder::Junk];

    /// Class implied by a mail sitting in this folder
    pub fn placement(&self) -> Class {
        match self {
            Folder::New | Folder::Cur => Class::Good,
            Folder::Junk => Class::Junk,
        }
    }

    /// Folder a mail learned as `class` is filed into
    pub fn filed(class: Class) -> Folder {
        match class {
            Class::Good => Folder::Cur,
            Class::Junk => Folder::Junk,
        }
    }

    /// Directories scanned for this folder, relative to the Maildir root
    fn dirs(&self) -> &'static [&'static str] {
        match self {
            Folder::New => &["new"],
            Folder::Cur => &["cur"],
            Folder::Junk => &[".Junk/cur", ".Junk/new"],
        }
    }

    /// Directory a mail is moved into
    fn target_dir(&self) -> &'static str {
        self.dirs()[0]
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Folder::New => "new",
            Folder::Cur => "cur",
            Folder::Junk => ".Junk",
        })
    }
}

/// A mail found in the Maildir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEntry {
    pub id: String,
    pub folder: Folder,
}

/// Decoded text of a mail
#[derive(Debug, Clone, Default)]
pub struct RawMail {
    pub subject: String,
    pub body: String,
}

/// Where mails come from and where they are filed
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Every mail currently in one of the watched folders
    async fn list(&self) -> Result<Vec<MailEntry>>;

    /// Folder a mail sits in right now, `None` once it is gone
    async fn folder_of(&self, id: &str) -> Result<Option<Folder>>;

    /// Subject and decoded body of a mail
    async fn load(&self, id: &str) -> Result<RawMail>;

    /// Move a mail between folders, keeping its file name
    async fn move_to(&self, id: &str, from: Folder, to: Folder) -> Result<()>;
}

/// [`MailSource`] over a Maildir directory with a `.Junk` subfolder
pub struct MaildirSource {
    root: PathBuf,
    /// Last known location of each mail, rebuilt by `list` and on a miss
    index: Mutex<HashMap<String, (Folder, PathBuf)>>,
}

impl MaildirSource {
    /// Open a Maildir, creating any missing directory
    pub async fn open(root: &Path) -> Result<Self> {
        for dir in ["new", "cur", "tmp", ".Junk/new", ".Junk/cur", ".Junk/tmp"] {
            let path = root.join(dir);
            if !path.exists() {
                fs::create_dir_all(&path).await?;
                info!("Created Maildir directory {}", path.display());
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            index: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory arrivals show up in
    pub fn new_dir(&self) -> PathBuf {
        self.root.join("new")
    }

    async fn scan(&self, folder: Folder) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        for dir in folder.dirs() {
            let mut entries = fs::read_dir(self.root.join(dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                found.push((mail_id(&name).to_string(), entry.path()));
            }
        }
        Ok(found)
    }

    /// Scan every folder and replace the index
    async fn refresh(&self) -> Result<Vec<MailEntry>> {
        let mut mails = Vec::new();
        let mut index = HashMap::new();
        for folder in Folder::ALL {
            for (id, path) in self.scan(folder).await? {
                mails.push(MailEntry {
                    id: id.clone(),
                    folder,
                });
                index.insert(id, (folder, path));
            }
        }

        *self.index.lock().await = index;
        Ok(mails)
    }

    /// Current folder and path of a mail.
    ///
    /// An indexed path is trusted only while the file is still there;
    /// otherwise the Maildir is rescanned once.
    async fn locate(&self, id: &str) -> Result<Option<(Folder, PathBuf)>> {
        let cached = self.index.lock().await.get(id).cloned();
        if let Some((folder, path)) = cached {
            if fs::try_exists(&path).await? {
                return Ok(Some((folder, path)));
            }
        }

        self.refresh().await?;
        Ok(self.index.lock().await.get(id).cloned())
    }
}

#[async_trait]
impl MailSource for MaildirSource {
    async fn list(&self) -> Result<Vec<MailEntry>> {
        let mut mails = self.refresh().await?;
        mails.sort_by(|a, b| a.id.cmp(&b.id));

        debug!("Listed {} mails in {}", mails.len(), self.root.display());
        Ok(mails)
    }

    async fn folder_of(&self, id: &str) -> Result<Option<Folder>> {
        Ok(self.locate(id).await?.map(|(folder, _)| folder))
    }

    async fn load(&self, id: &str) -> Result<RawMail> {
        let (_, path) = self
            .locate(id)
            .await?
            .ok_or_else(|| JunkError::MessageNotFound(id.to_string()))?;
        let content = fs::read(&path).await?;

        let message = MessageParser::default().parse(&content).ok_or_else(|| {
            JunkError::TokenExtraction(format!("Failed to parse message {}", id))
        })?;

        Ok(RawMail {
            subject: message.subject().unwrap_or("").to_string(),
            body: message
                .body_text(0)
                .map(|b| b.to_string())
                .unwrap_or_default(),
        })
    }

    async fn move_to(&self, id: &str, from: Folder, to: Folder) -> Result<()> {
        let source = match self.locate(id).await? {
            Some((folder, path)) if folder == from => path,
            _ => return Err(JunkError::MessageNotFound(format!("{} in {}", id, from))),
        };

        let file_name = source
            .file_name()
            .ok_or_else(|| JunkError::MessageNotFound(id.to_string()))?;
        let target = self.root.join(to.target_dir()).join(file_name);

        fs::rename(&source, &target).await?;
        self.index
            .lock()
            .await
            .insert(id.to_string(), (to, target));

        debug!("Moved {} from {} to {}", id, from, to);
        Ok(())
    }
}
