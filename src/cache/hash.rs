//! Content Fingerprints
//!
//! Two independent fingerprints. Values from one must never be compared with
//! values from the other.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::constants::cache as cache_constants;

/// Fast 32-bit rolling hash over UTF-16 code units (`h = h * 31 + unit`),
/// rendered as fixed-width lowercase hex.
pub fn compute_content_hash(content: &str) -> String {
    let hash = content
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    format!(
        "{:0width$x}",
        hash as u32,
        width = cache_constants::FAST_HASH_WIDTH
    )
}

/// SHA-256 fingerprint truncated to a fixed number of hex digits.
///
/// Digesting runs on the blocking pool; if that worker cannot run, the fast
/// hash is returned instead.
pub async fn compute_content_hash_async(content: &str) -> String {
    let owned = content.to_string();
    match tokio::task::spawn_blocking(move || secure_digest(&owned)).await {
        Ok(digest) => digest,
        Err(e) => {
            warn!("Secure hashing unavailable ({}), using fast hash", e);
            compute_content_hash(content)
        }
    }
}

fn secure_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(cache_constants::SECURE_HASH_WIDTH);
    hex
}
