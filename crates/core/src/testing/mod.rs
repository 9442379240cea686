//! Testing utilities and mock implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use crackhash_core::testing::{fixtures, MockJobStore};
//!
//! let store = MockJobStore::new();
//! store.set_fail_saves(true);
//!
//! // Hand the store to an orchestrator, then inspect what was persisted...
//! let digest = fixtures::md5_hex("ab");
//! ```

mod mock_job_store;
mod recording_handler;

pub use mock_job_store::MockJobStore;
pub use recording_handler::RecordingHandler;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::time::Duration;

    use crate::engine::{Alphabet, DigestFn, Md5Digest};
    use crate::job::Job;
    use crate::orchestrator::OrchestratorConfig;

    /// Lowercase hex MD5 of a string.
    pub fn md5_hex(input: &str) -> String {
        Md5Digest.hex_digest(input.as_bytes())
    }

    /// Two-symbol alphabet `{a, b}`, small enough to enumerate by hand.
    pub fn ab_alphabet() -> Alphabet {
        Alphabet::from_chars("ab").unwrap()
    }

    /// An `InProgress` job over `{a, b}` searching for `target`.
    pub fn job(target: &str, max_length: u32, part_count: u32) -> Job {
        let mut job = Job::new(md5_hex(target), max_length, ab_alphabet(), part_count);
        job.begin();
        job
    }

    /// Orchestrator config over `{a, b}` with the given part count and timeout.
    pub fn orchestrator_config(worker_count: u32, timeout: Duration) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_count,
            job_timeout_secs: timeout.as_secs(),
            alphabet: ab_alphabet(),
            max_length_limit: 8,
        }
    }
}
