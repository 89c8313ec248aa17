use crate::bayes::Class;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JunkError {
    #[error("No mails have been learned so far")]
    NoTrainingData,

    #[error("No {0} mails have been learned so far")]
    NoTrainingDataForClass(Class),

    #[error("Counter corruption: {0}")]
    CounterCorruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token extraction failed: {0}")]
    TokenExtraction(String),

    #[error("Invalid class: {0}")]
    InvalidClass(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JunkError {
    /// True when the store has not seen enough mail to classify yet.
    ///
    /// Callers defer the message instead of treating it as good or junk.
    pub fn is_untrained(&self) -> bool {
        matches!(
            self,
            JunkError::NoTrainingData | JunkError::NoTrainingDataForClass(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, JunkError>;
