//! Range execution: enumerate a slice of the space and test each candidate.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{DigestFn, EngineError, SearchSpace};

/// Candidates tested between two looks at the stop flag.
const STOP_CHECK_INTERVAL: u64 = 4096;

/// Enumerate global indices `[start, end)` and return every candidate whose
/// digest equals `target`.
///
/// Only the length blocks intersecting the range are visited, and each
/// candidate is decoded directly from its index, so the cost is proportional
/// to the range size rather than to `start`.
pub fn execute(
    space: &SearchSpace,
    digest: &dyn DigestFn,
    target: &str,
    start: u64,
    end: u64,
) -> Result<Vec<String>, EngineError> {
    let never = AtomicBool::new(false);
    let matches = execute_until(space, digest, target, start, end, &never)?;
    Ok(matches.unwrap_or_default())
}

/// Same as [`execute`], but returns `None` as soon as `stop` is seen set.
pub fn execute_until(
    space: &SearchSpace,
    digest: &dyn DigestFn,
    target: &str,
    start: u64,
    end: u64,
    stop: &AtomicBool,
) -> Result<Option<Vec<String>>, EngineError> {
    space.check_range(start, end)?;

    let mut matches = Vec::new();
    if start == end {
        return Ok(Some(matches));
    }

    for (len, block_start, block_size) in space.blocks() {
        let block_end = block_start + block_size;
        if block_end <= start {
            continue;
        }
        if block_start >= end {
            break;
        }

        let from = start.max(block_start) - block_start;
        let to = end.min(block_end) - block_start;
        for local in from..to {
            if (local - from) % STOP_CHECK_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let candidate = space.decode_local(local, len);
            if digest.hex_digest(candidate.as_bytes()) == target {
                matches.push(candidate);
            }
        }
    }

    Ok(Some(matches))
}
