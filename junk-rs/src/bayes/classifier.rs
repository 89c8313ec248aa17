//! Naive-Bayes junk classification
//!
//! Each word yields the posterior P(good | word) by Bayes' rule from the
//! class prior and the per-class word likelihoods. The per-word posteriors
//! are combined with the harmonic mean, which is dominated by its smallest
//! inputs: one strongly junk-indicative word pulls the whole mail towards
//! junk.

use super::types::{Class, Classification};
use crate::error::Result;
use crate::store::{Snapshot, StatsStore};

/// Bayesian classifier reading from one mailbox's statistics
pub struct BayesianClassifier<'a> {
    store: &'a StatsStore,
}

impl<'a> BayesianClassifier<'a> {
    pub fn new(store: &'a StatsStore) -> Self {
        Self { store }
    }

    /// Classify a word list within a single store snapshot.
    ///
    /// Fails with `NoTrainingData` / `NoTrainingDataForClass` when the store
    /// cannot support a verdict yet; no word is ever skipped.
    pub async fn classify(&self, words: &[String]) -> Result<Classification> {
        let mut snapshot = self.store.snapshot().await?;
        let result = classify_snapshot(&mut snapshot, words).await;
        snapshot.finish().await?;
        result
    }
}

/// Classify `words` against an open snapshot
pub async fn classify_snapshot(snapshot: &mut Snapshot, words: &[String]) -> Result<Classification> {
    let prior_good = snapshot.prior(Class::Good).await?;

    let mut posteriors = Vec::with_capacity(words.len());
    for word in words {
        posteriors.push(posterior(snapshot, prior_good, word).await?);
    }

    Ok(Classification::new(harmonic_mean(&posteriors)))
}

async fn posterior(snapshot: &mut Snapshot, prior_good: f64, word: &str) -> Result<f64> {
    let likelihood_good = snapshot.likelihood(Class::Good, word).await?;
    let likelihood_junk = snapshot.likelihood(Class::Junk, word).await?;

    Ok(bayes_rule(likelihood_good, likelihood_junk, prior_good))
}

/// P(good | word) for a two-class model.
///
/// A word seen in neither class gives 0/0 = NaN, which is kept as is.
pub fn bayes_rule(likelihood_good: f64, likelihood_junk: f64, prior_good: f64) -> f64 {
    (likelihood_good * prior_good)
        / (likelihood_good * prior_good + likelihood_junk * (1.0 - prior_good))
}

/// n / Σ(1/xᵢ); 1.0 for an empty list
pub fn harmonic_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let reciprocal_sum: f64 = values.iter().map(|v| 1.0 / v).sum();
    values.len() as f64 / reciprocal_sum
}
