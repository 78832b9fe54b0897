//! Content hashing used for document and chunk deduplication.

use sha2::{Digest, Sha256};

/// SHA-256 of `title ‖ content`, hex-encoded. Identity of a document.
pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a chunk's (possibly transformed) text, hex-encoded. Identity of a chunk.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let a = content_hash("Title", "Body text");
        let b = content_hash("Title", "Body text");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_hash_distinguishes_title_content_boundary() {
        // "Ti" + "tleBody" must not collide with "Tit" + "leBody"
        let a = content_hash("Ti", "tleBody");
        let b = content_hash("Tit", "leBody");
        assert_ne!(a, b);
    }

    #[test]
    fn text_hash_changes_with_any_byte() {
        let a = text_hash("hello world");
        let b = text_hash("hello world.");
        assert_ne!(a, b);
    }
}
