/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Truncate a hex digest to at most `len` characters.
#[must_use]
pub fn truncate_hex(hex: &str, len: usize) -> &str {
    &hex[..len.min(hex.len())]
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
    fn test_truncate_hex() {
        assert_eq!(truncate_hex("abcdef", 4), "abcd");
        assert_eq!(truncate_hex("abc", 8), "abc");
    }
}
