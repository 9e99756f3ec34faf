//! Content fingerprints for watched documents.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw document bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let first = content_hash(b"# build a calculator\n");
        let second = content_hash(b"# build a calculator\n");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn content_hash_differs_on_single_byte() {
        assert_ne!(content_hash(b"note"), content_hash(b"note\n"));
    }

    #[test]
    fn content_hash_of_empty_input_is_stable() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
