//! Pluggable digest function.

/// A hash function producing a lowercase hex digest.
pub trait DigestFn: Send + Sync {
    /// Short name for logs and config.
    fn name(&self) -> &'static str;

    /// Length of the hex digest in characters.
    fn hex_len(&self) -> usize;

    /// Lowercase hex digest of `input`.
    fn hex_digest(&self, input: &[u8]) -> String;
}

/// MD5, the default 128-bit digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Digest;

impl DigestFn for Md5Digest {
    fn name(&self) -> &'static str {
        "md5"
    }

    fn hex_len(&self) -> usize {
        32
    }

    fn hex_digest(&self, input: &[u8]) -> String {
        format!("{:x}", md5::compute(input))
    }
}
