/// Half-open row key ranges
///
/// A `RowRange` selects every row whose key `k` satisfies `start <= k < limit`
/// in byte order. An empty `limit` means the range has no upper bound.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    start: Bytes,
    limit: Bytes,
}

impl RowRange {
    /// Build a range from raw byte bounds.
    pub fn new(start: impl Into<Bytes>, limit: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            limit: limit.into(),
        }
    }

    /// All rows with keys in `[start, limit)`. An empty `limit` includes every
    /// key `>= start`. Inverted bounds are accepted and simply match nothing.
    pub fn range(start: &str, limit: &str) -> Self {
        Self::new(
            Bytes::copy_from_slice(start.as_bytes()),
            Bytes::copy_from_slice(limit.as_bytes()),
        )
    }

    /// All rows whose key begins with `prefix`.
    ///
    /// `prefix("")` is the canonical range covering every row.
    pub fn prefix(prefix: &str) -> Self {
        Self::prefix_bytes(prefix.as_bytes())
    }

    /// Byte-level variant of [`RowRange::prefix`].
    pub fn prefix_bytes(prefix: &[u8]) -> Self {
        Self::new(
            Bytes::copy_from_slice(prefix),
            Bytes::from(prefix_limit(prefix)),
        )
    }

    /// The narrowest range containing only `key`.
    pub fn single_row(key: &str) -> Self {
        let mut limit = Vec::with_capacity(key.len() + 1);
        limit.extend_from_slice(key.as_bytes());
        limit.push(0x00);
        Self::new(Bytes::copy_from_slice(key.as_bytes()), Bytes::from(limit))
    }

    /// Every row.
    pub fn all() -> Self {
        Self::prefix("")
    }

    pub fn start(&self) -> &[u8] {
        &self.start
    }

    pub fn limit(&self) -> &[u8] {
        &self.limit
    }

    /// True when the range has no upper bound.
    pub fn is_unbounded(&self) -> bool {
        self.limit.is_empty()
    }

    /// Whether `key` falls inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && (self.is_unbounded() || key < self.limit.as_ref())
    }
}

/// Compute the exclusive upper bound for keys beginning with `prefix`.
///
/// Treats the prefix as a base-256 number and increments it, dropping
/// trailing `0xFF` bytes that carry. A prefix made only of `0xFF` bytes
/// (or an empty prefix) has no finite bound and yields an empty limit.
pub fn prefix_limit(prefix: &[u8]) -> Vec<u8> {
    let mut limit = prefix.to_vec();
    while let Some(last) = limit.pop() {
        if last < 0xFF {
            limit.push(last + 1);
            return limit;
        }
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_increments_last_byte() {
        let r = RowRange::prefix("ab");
        assert_eq!(r.start(), b"ab");
        assert_eq!(r.limit(), b"ac");
    }

    #[test]
    fn test_prefix_carries_over_ff() {
        assert_eq!(prefix_limit(b"a\xFF"), b"b".to_vec());
        assert_eq!(prefix_limit(b"a\xFE\xFF\xFF"), b"a\xFF".to_vec());
    }

    #[test]
    fn test_prefix_all_ff_is_unbounded() {
        let r = RowRange::prefix_bytes(b"\xFF\xFF");
        assert_eq!(r.start(), b"\xFF\xFF");
        assert!(r.is_unbounded());
        assert!(r.contains(b"\xFF\xFF\x01"));
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let r = RowRange::prefix("");
        assert!(r.start().is_empty());
        assert!(r.limit().is_empty());
        assert_eq!(r, RowRange::all());
        assert!(r.contains(b""));
        assert!(r.contains(b"anything"));
    }

    #[test]
    fn test_single_row() {
        let r = RowRange::single_row("k");
        assert_eq!(r.start(), b"k");
        assert_eq!(r.limit(), b"k\x00");
        assert!(r.contains(b"k"));
        assert!(!r.contains(b"k\x00"));
        assert!(!r.contains(b"ka"));
        assert!(!r.contains(b"j"));
    }

    #[test]
    fn test_range_is_half_open() {
        let r = RowRange::range("b", "d");
        assert!(!r.contains(b"a"));
        assert!(r.contains(b"b"));
        assert!(r.contains(b"czz"));
        assert!(!r.contains(b"d"));
    }

    #[test]
    fn test_inverted_range_matches_nothing() {
        let r = RowRange::range("z", "a");
        assert!(!r.contains(b"m"));
        assert!(!r.contains(b"z"));
    }

    #[test]
    fn test_range_with_empty_limit_is_unbounded() {
        let r = RowRange::range("m", "");
        assert!(r.is_unbounded());
        assert!(r.contains(b"zzzz"));
        assert!(!r.contains(b"a"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let r = RowRange::prefix("user/");
        let json = serde_json::to_string(&r).unwrap();
        let back: RowRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    proptest! {
        #[test]
        fn prop_prefix_limit_law(prefix in proptest::collection::vec(any::<u8>(), 1..16)) {
            let limit = prefix_limit(&prefix);
            let trimmed_len = prefix.iter().rposition(|b| *b != 0xFF);
            match trimmed_len {
                None => prop_assert!(limit.is_empty()),
                Some(i) => {
                    let mut expected = prefix[..=i].to_vec();
                    expected[i] += 1;
                    prop_assert_eq!(limit, expected);
                }
            }
        }

        #[test]
        fn prop_prefix_range_contains_extensions(
            prefix in proptest::collection::vec(any::<u8>(), 0..8),
            suffix in proptest::collection::vec(any::<u8>(), 0..8),
        ) {
            let r = RowRange::prefix_bytes(&prefix);
            let mut key = prefix.clone();
            key.extend_from_slice(&suffix);
            prop_assert!(r.contains(&key));
        }
    }
}
