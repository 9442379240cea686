//! Global index arithmetic: block layout, decoding and partitioning.

use std::ops::Range;

use super::{Alphabet, EngineError};

/// The ordered space of all candidates of length `1..=max_length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    alphabet: Alphabet,
    max_length: u32,
    total: u64,
}

impl SearchSpace {
    /// Create a search space, failing if its size does not fit in a `u64`.
    pub fn new(alphabet: Alphabet, max_length: u32) -> Result<Self, EngineError> {
        if max_length == 0 {
            return Err(EngineError::ZeroLength);
        }

        let too_large = || EngineError::SpaceTooLarge {
            symbols: alphabet.len(),
            max_length,
        };

        let k = alphabet.len() as u64;
        let mut block = 1u64;
        let mut total = 0u64;
        for _ in 0..max_length {
            block = block.checked_mul(k).ok_or_else(too_large)?;
            total = total.checked_add(block).ok_or_else(too_large)?;
        }

        Ok(Self {
            alphabet,
            max_length,
            total,
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Number of candidates in the whole space: `Σ k^len` for `len` in `1..=L`.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Length blocks in order as `(len, global_start, size)`.
    pub fn blocks(&self) -> impl Iterator<Item = (u32, u64, u64)> + '_ {
        let k = self.alphabet.len() as u64;
        // Cannot overflow: `new` proved the sum of all blocks fits.
        (1..=self.max_length).scan((0u64, 1u64), move |(offset, size), len| {
            *size *= k;
            let block = (len, *offset, *size);
            *offset += *size;
            Some(block)
        })
    }

    /// Check that `[start, end)` lies within the space.
    pub fn check_range(&self, start: u64, end: u64) -> Result<(), EngineError> {
        if start > end || end > self.total {
            return Err(EngineError::InvalidRange {
                start,
                end,
                total: self.total,
            });
        }
        Ok(())
    }

    /// Decode a local index within the block of length `len`.
    ///
    /// Positional numeral with the alphabet as digit set, most significant
    /// symbol first. Requires `local < k^len`.
    pub fn decode_local(&self, mut local: u64, len: u32) -> String {
        let k = self.alphabet.len() as u64;
        let mut out = vec![self.alphabet.symbol(0); len as usize];
        for slot in out.iter_mut().rev() {
            *slot = self.alphabet.symbol((local % k) as usize);
            local /= k;
        }
        out.into_iter().collect()
    }

    /// Decode a global index into its candidate string.
    pub fn decode(&self, global: u64) -> Option<String> {
        self.blocks()
            .find(|&(_, start, size)| global >= start && global - start < size)
            .map(|(len, start, _)| self.decode_local(global - start, len))
    }

    /// Global index of a candidate, the inverse of [`SearchSpace::decode`].
    pub fn encode(&self, candidate: &str) -> Option<u64> {
        let len = candidate.chars().count() as u32;
        if len == 0 || len > self.max_length {
            return None;
        }

        let k = self.alphabet.len() as u64;
        let mut local = 0u64;
        for c in candidate.chars() {
            local = local * k + self.alphabet.position(c)? as u64;
        }

        let (_, start, _) = self.blocks().find(|&(l, _, _)| l == len)?;
        Some(start + local)
    }
}

/// Range of global indices assigned to `part` out of `part_count`.
///
/// `size = ceil(total / part_count)`; both bounds are clamped to `total`, so
/// trailing parts may be empty when there are more parts than candidates.
pub fn part_range(total: u64, part_count: u32, part: u32) -> Result<Range<u64>, EngineError> {
    if part_count == 0 {
        return Err(EngineError::ZeroParts);
    }

    let size = total.div_ceil(part_count as u64);
    let start = (part as u64).saturating_mul(size).min(total);
    let end = start.saturating_add(size).min(total);
    Ok(start..end)
}

/// All part ranges, in part order.
pub fn partition(total: u64, part_count: u32) -> Result<Vec<Range<u64>>, EngineError> {
    (0..part_count)
        .map(|part| part_range(total, part_count, part))
        .collect()
}
