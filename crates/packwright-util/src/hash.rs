/// BLAKE3 digest of `data`, hex-encoded.
///
/// Used for module content hashes and artifact hashes; equal bytes always
/// produce the same id across runs and platforms.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes() {
        // Known BLAKE3 hash of "hello world"
        assert_eq!(
            blake3_bytes(b"hello world"),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_distinct_content_distinct_hash() {
        assert_ne!(blake3_bytes(b"bundle v1"), blake3_bytes(b"bundle v2"));
        assert_eq!(blake3_bytes(b"").len(), 64);
    }
}
