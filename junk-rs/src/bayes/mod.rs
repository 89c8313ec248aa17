//! Bayesian junk classification
//!
//! - [`types`]: mail classes, classification results, statistics
//! - [`classifier`]: priors, likelihoods and the harmonic-mean posterior

pub mod classifier;
pub mod types;

pub use classifier::{harmonic_mean, BayesianClassifier};
pub use types::{Class, Classification, Stats};
