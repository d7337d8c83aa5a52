//! Shared utility functions and constants

use sha2::{Digest, Sha256};

/// Number of bytes to use from SHA256 hash for content hashing
pub const CONTENT_HASH_BYTES: usize = 16;

/// Short commit ID length
pub const SHORT_COMMIT_LEN: usize = 7;

/// Truncate a string to max characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate or pad to exact length, using ellipsis for truncation
pub fn truncate_or_pad(s: &str, len: usize) -> String {
    if s.chars().count() > len {
        let kept: String = s.chars().take(len.saturating_sub(1)).collect();
        format!("{}…", kept)
    } else {
        format!("{:<width$}", s, width = len)
    }
}

/// First characters of a commit reference
pub fn short_commit(commit: &str) -> &str {
    match commit.char_indices().nth(SHORT_COMMIT_LEN) {
        Some((end, _)) => &commit[..end],
        None => commit,
    }
}

/// Truncated SHA-256 of `content` as hex
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..CONTENT_HASH_BYTES])
}

/// Hex encoding utilities
pub mod hex {
    /// Encode bytes as hex string
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("ümlaut text", 6), "üml...");
    }

    #[test]
    fn test_truncate_or_pad() {
        assert_eq!(truncate_or_pad("hi", 5), "hi   ");
        assert_eq!(truncate_or_pad("hello world", 5), "hell…");
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("HEAD"), "HEAD");
    }

    #[test]
    fn test_content_hash() {
        let hash = content_hash("helloworld");
        assert_eq!(hash.len(), 32); // 16 bytes = 32 hex chars
        assert_eq!(hash, content_hash("helloworld"));
        assert_ne!(hash, content_hash("hello"));
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex::encode(&[0x00, 0xff, 0x10]), "00ff10");
        assert_eq!(hex::encode(&[]), "");
    }
}
