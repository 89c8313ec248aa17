//! Approximate distinct counting
//!
//! Word and class statistics count *distinct message ids*, not occurrences.
//! Keeping an exact id set per word would grow with every learned mail, so
//! counters are fixed-size cardinality sketches instead.
//!
//! - [`CardinalityEstimator`]: the contract the statistics store relies on
//! - [`HyperLogLog`]: sparse/dense HyperLogLog implementation

pub mod hll;

pub use hll::HyperLogLog;

use crate::error::Result;

/// A mergeable distinct-count sketch.
///
/// Implementations must guarantee:
/// - `add` is idempotent for the same item
/// - `count` never decreases as items are added
/// - merging sketches over sets A and B yields the same state as one sketch
///   that saw A ∪ B
/// - `from_bytes(to_bytes())` reproduces the exact sketch state
pub trait CardinalityEstimator: Clone + Default + Send + Sync {
    /// Mark an item as observed
    fn add(&mut self, item: &[u8]);

    /// Current distinct count estimate
    fn count(&self) -> u64;

    /// Fold another sketch into this one
    fn merge(&mut self, other: &Self);

    /// Serialize the sketch state
    fn to_bytes(&self) -> Vec<u8>;

    /// Restore a sketch from [`CardinalityEstimator::to_bytes`] output
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}
