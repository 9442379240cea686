//! Candidate enumeration over a bounded combinatorial search space.
//!
//! The space for an alphabet of `k` symbols and bound `L` is the ordered
//! concatenation of one block per length `1..=L`, each block holding `k^len`
//! candidates. A global index maps to exactly one candidate; the orchestrator
//! partitions by global index and the executor enumerates by it, so both sides
//! must go through [`SearchSpace`].

mod alphabet;
mod digest;
mod search;
mod space;

pub use alphabet::Alphabet;
pub use digest::{DigestFn, Md5Digest};
pub use search::{execute, execute_until};
pub use space::{part_range, partition, SearchSpace};

use thiserror::Error;

/// Errors raised by the partition/execution engine.
///
/// Only malformed input fails; an empty match list is a valid result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("alphabet must not be empty")]
    EmptyAlphabet,

    #[error("alphabet symbol {0:?} is not a single character")]
    InvalidSymbol(String),

    #[error("alphabet symbol {0:?} appears more than once")]
    DuplicateSymbol(String),

    #[error("max length must be greater than 0")]
    ZeroLength,

    #[error("search space for {symbols} symbols up to length {max_length} exceeds u64")]
    SpaceTooLarge { symbols: usize, max_length: u32 },

    #[error("invalid range [{start}, {end}) for search space of size {total}")]
    InvalidRange { start: u64, end: u64, total: u64 },

    #[error("part count must be greater than 0")]
    ZeroParts,
}
