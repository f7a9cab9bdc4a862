use std::cmp::Ordering;
use std::fmt::Write;

/// Orders the fixed-size serialized keys of one index.
pub trait KeyComparator: Send + Sync {
    /// Width in bytes of every key this comparator accepts.
    fn key_size(&self) -> usize;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Human-readable rendering used by tree dumps.
    fn format_key(&self, key: &[u8]) -> String {
        let mut out = String::with_capacity(key.len() * 2);
        for byte in key {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}

/// Compares opaque keys of a fixed width byte by byte.
pub struct BytewiseComparator {
    key_size: usize,
}

impl BytewiseComparator {
    pub fn new(key_size: usize) -> Self {
        Self { key_size }
    }
}

impl KeyComparator for BytewiseComparator {
    fn key_size(&self) -> usize {
        self.key_size
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytewise_comparator() {
        let cmp = BytewiseComparator::new(2);
        assert_eq!(cmp.key_size(), 2);
        assert_eq!(cmp.compare(&[0, 1], &[0, 2]), Ordering::Less);
        assert_eq!(cmp.compare(&[1, 0], &[0, 255]), Ordering::Greater);
        assert_eq!(cmp.format_key(&[0xab, 0x01]), "ab01");
    }
}
