use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JunkError;

/// The two mail classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Class {
    Good,
    Junk,
}

impl Class {
    pub const ALL: [Class; 2] = [Class::Good, Class::Junk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Class::Good => "good",
            Class::Junk => "junk",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Class {
    type Err = JunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "good" => Ok(Class::Good),
            "junk" => Ok(Class::Junk),
            _ => Err(JunkError::InvalidClass(s.to_string())),
        }
    }
}

/// Result of classifying a word list
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    /// Verdict: aggregate good-posterior strictly below 0.5
    pub is_junk: bool,
    /// Harmonic mean of the per-word good-posteriors (NaN for unseen words)
    pub probability: f64,
}

impl Classification {
    pub fn new(probability: f64) -> Self {
        Self {
            // NaN < 0.5 is false: unknown evidence never files a mail as junk
            is_junk: probability < 0.5,
            probability,
        }
    }

    pub fn class(&self) -> Class {
        if self.is_junk {
            Class::Junk
        } else {
            Class::Good
        }
    }

    /// Probability that the mail is junk
    pub fn junk_probability(&self) -> f64 {
        1.0 - self.probability
    }
}

/// Store statistics for one mailbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Distinct good mails learned
    pub good_total: u64,
    /// Distinct junk mails learned
    pub junk_total: u64,
    /// Distinct words seen in good mails
    pub good_words: u64,
    /// Distinct words seen in junk mails
    pub junk_words: u64,
}
