//! HyperLogLog with an exact sparse phase
//!
//! Small sets (up to [`SPARSE_LIMIT`] distinct items) are kept as a sorted
//! set of 64-bit hashes, so counts are exact for the common case of words
//! seen in a handful of mails. Larger sets switch to `2^PRECISION` one-byte
//! registers estimated with Ertl's improved raw estimator.
//!
//! # Wire format
//! ```text
//! [version: u8 = 1][precision: u8][mode: u8]
//! mode 0 (sparse): [n: u32 LE][n × hash: u64 LE, strictly increasing]
//! mode 1 (dense):  [2^precision × register: u8]
//! ```

use bytes::{Buf, BufMut, BytesMut};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use super::CardinalityEstimator;
use crate::error::{JunkError, Result};

/// Register index bits
pub const PRECISION: u8 = 12;

/// Number of registers in dense mode
pub const REGISTERS: usize = 1 << PRECISION;

/// Largest number of hashes kept in sparse mode (same byte size as dense)
pub const SPARSE_LIMIT: usize = REGISTERS / 8;

/// Highest register value: remaining hash bits + 1
const MAX_RANK: u8 = 64 - PRECISION + 1;

const FORMAT_VERSION: u8 = 1;
const MODE_SPARSE: u8 = 0;
const MODE_DENSE: u8 = 1;

/// 1 / (2 ln 2)
const ALPHA_INF: f64 = 0.721_347_520_444_481_7;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr {
    Sparse(BTreeSet<u64>),
    Dense(Vec<u8>),
}

/// Distinct-count sketch over arbitrary byte strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    repr: Repr,
}

impl HyperLogLog {
    /// Create an empty sketch
    pub fn new() -> Self {
        Self {
            repr: Repr::Sparse(BTreeSet::new()),
        }
    }

    /// True while the count is exact
    pub fn is_sparse(&self) -> bool {
        matches!(self.repr, Repr::Sparse(_))
    }

    /// Stable 64-bit hash of an item
    ///
    /// Persisted sketches outlive the process, so this must not depend on a
    /// per-process seed.
    fn hash(item: &[u8]) -> u64 {
        let digest = Sha256::digest(item);
        let mut first = [0u8; 8];
        first.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(first)
    }

    fn insert_hash(&mut self, hash: u64) {
        match &mut self.repr {
            Repr::Sparse(hashes) => {
                hashes.insert(hash);
                if hashes.len() > SPARSE_LIMIT {
                    self.densify();
                }
            }
            Repr::Dense(registers) => update_register(registers, hash),
        }
    }

    fn densify(&mut self) {
        if let Repr::Sparse(hashes) = &self.repr {
            let mut registers = vec![0u8; REGISTERS];
            for &hash in hashes {
                update_register(&mut registers, hash);
            }
            self.repr = Repr::Dense(registers);
        }
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CardinalityEstimator for HyperLogLog {
    fn add(&mut self, item: &[u8]) {
        self.insert_hash(Self::hash(item));
    }

    fn count(&self) -> u64 {
        match &self.repr {
            Repr::Sparse(hashes) => hashes.len() as u64,
            // A dense sketch has seen more than SPARSE_LIMIT distinct items.
            Repr::Dense(registers) => {
                let estimate = estimate(registers).round() as u64;
                estimate.max(SPARSE_LIMIT as u64 + 1)
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        match &other.repr {
            Repr::Sparse(hashes) => {
                for &hash in hashes {
                    self.insert_hash(hash);
                }
            }
            Repr::Dense(other_registers) => {
                self.densify();
                if let Repr::Dense(registers) = &mut self.repr {
                    for (mine, theirs) in registers.iter_mut().zip(other_registers) {
                        *mine = (*mine).max(*theirs);
                    }
                }
            }
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(3 + REGISTERS);
        buf.put_u8(FORMAT_VERSION);
        buf.put_u8(PRECISION);

        match &self.repr {
            Repr::Sparse(hashes) => {
                buf.put_u8(MODE_SPARSE);
                buf.put_u32_le(hashes.len() as u32);
                for &hash in hashes {
                    buf.put_u64_le(hash);
                }
            }
            Repr::Dense(registers) => {
                buf.put_u8(MODE_DENSE);
                buf.put_slice(registers);
            }
        }

        buf.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        if buf.remaining() < 3 {
            return Err(corrupt(format!("sketch header truncated ({} bytes)", bytes.len())));
        }

        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unknown sketch version {}", version)));
        }
        let precision = buf.get_u8();
        if precision != PRECISION {
            return Err(corrupt(format!("unsupported precision {}", precision)));
        }

        match buf.get_u8() {
            MODE_SPARSE => {
                if buf.remaining() < 4 {
                    return Err(corrupt("sparse length truncated".to_string()));
                }
                let len = buf.get_u32_le() as usize;
                if len > SPARSE_LIMIT || buf.remaining() != len * 8 {
                    return Err(corrupt(format!(
                        "sparse sketch declares {} hashes, has {} bytes",
                        len,
                        buf.remaining()
                    )));
                }

                let mut hashes = BTreeSet::new();
                let mut previous = None;
                for _ in 0..len {
                    let hash = buf.get_u64_le();
                    if previous.is_some_and(|p| p >= hash) {
                        return Err(corrupt("sparse hashes out of order".to_string()));
                    }
                    previous = Some(hash);
                    hashes.insert(hash);
                }
                Ok(Self {
                    repr: Repr::Sparse(hashes),
                })
            }
            MODE_DENSE => {
                if buf.remaining() != REGISTERS {
                    return Err(corrupt(format!(
                        "dense sketch has {} registers, expected {}",
                        buf.remaining(),
                        REGISTERS
                    )));
                }
                if buf.iter().any(|&r| r > MAX_RANK) {
                    return Err(corrupt("register value out of range".to_string()));
                }
                Ok(Self {
                    repr: Repr::Dense(buf.to_vec()),
                })
            }
            mode => Err(corrupt(format!("unknown sketch mode {}", mode))),
        }
    }
}

fn corrupt(reason: String) -> JunkError {
    JunkError::CounterCorruption(reason)
}

fn update_register(registers: &mut [u8], hash: u64) {
    let index = (hash >> (64 - PRECISION)) as usize;
    let rest = hash << PRECISION;
    let rank = (rest.leading_zeros() + 1).min(MAX_RANK as u32) as u8;
    if registers[index] < rank {
        registers[index] = rank;
    }
}

/// Ertl's improved raw estimator ("New cardinality estimation algorithms
/// for HyperLogLog sketches", 2017).
///
/// Raising any register strictly lowers the denominator, so the estimate is
/// monotone in the register state.
fn estimate(registers: &[u8]) -> f64 {
    let m = registers.len() as f64;
    let q = (64 - PRECISION) as usize;

    let mut histogram = vec![0u32; q + 2];
    for &register in registers {
        histogram[register as usize] += 1;
    }

    let mut z = m * tau(1.0 - f64::from(histogram[q + 1]) / m);
    for k in (1..=q).rev() {
        z += f64::from(histogram[k]);
        z *= 0.5;
    }
    z += m * sigma(f64::from(histogram[0]) / m);

    ALPHA_INF * m * m / z
}

fn sigma(mut x: f64) -> f64 {
    if x == 1.0 {
        return f64::INFINITY;
    }
    let mut y = 1.0;
    let mut z = x;
    loop {
        x *= x;
        let previous = z;
        z += x * y;
        y += y;
        if z == previous {
            return z;
        }
    }
}

fn tau(mut x: f64) -> f64 {
    if x == 0.0 || x == 1.0 {
        return 0.0;
    }
    let mut y = 1.0;
    let mut z = 1.0 - x;
    loop {
        x = x.sqrt();
        let previous = z;
        y *= 0.5;
        z -= (1.0 - x).powi(2) * y;
        if z == previous {
            return z / 3.0;
        }
    }
}
