//! Byte-range partitioning for parallel workers.
//!
//! Ranges are half-open `[start, end)` and contiguous: worker `i + 1`
//! begins exactly where worker `i` ends, so the union of all ranges is
//! `[0, len)` with no gaps and no overlaps.

use std::path::Path;

/// One worker's slice of the download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// Worker index; also the part file suffix.
    pub index: usize,
    /// First byte of the slice.
    pub start: u64,
    /// One past the last byte of the slice.
    pub end: u64,
}

impl PartRange {
    /// Nominal length of the slice in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// True when the slice covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// The slice that remains after `already_on_disk` bytes of it exist
    /// locally. An oversized part file yields an empty remainder rather
    /// than an inverted range.
    pub fn remaining_after(&self, already_on_disk: u64) -> PartRange {
        PartRange {
            index: self.index,
            start: (self.start + already_on_disk).min(self.end),
            end: self.end,
        }
    }
}

/// Split `[0, len)` into `parts` contiguous ranges.
///
/// The first `parts - 1` ranges have equal size `len / parts`; the last
/// absorbs the remainder. `parts` must be at least 1.
pub fn plan(len: u64, parts: usize) -> Vec<PartRange> {
    debug_assert!(parts >= 1);
    let part_size = len / parts as u64;

    (0..parts)
        .map(|index| {
            let start = part_size * index as u64;
            let end = if index == parts - 1 {
                len
            } else {
                start + part_size
            };
            PartRange { index, start, end }
        })
        .collect()
}

/// Size of the part file at `path`, or 0 when it does not exist.
pub async fn bytes_on_disk(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_covers_exactly_without_gaps() {
        for len in [1u64, 1023, 1024, 1025, 100 * 1024, 10 * 1024 * 1024] {
            for parts in [1usize, 2, 4, 8, 16] {
                let ranges = plan(len, parts);

                assert_eq!(ranges.len(), parts);
                assert_eq!(ranges[0].start, 0);
                assert_eq!(ranges[parts - 1].end, len);
                for pair in ranges.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start, "len={len} parts={parts}");
                }
                let covered: u64 = ranges.iter().map(PartRange::len).sum();
                assert_eq!(covered, len);
            }
        }
    }

    #[test]
    fn test_plan_equal_parts_with_remainder_in_last() {
        let ranges = plan(10, 4);
        assert_eq!(ranges[0].len(), 2);
        assert_eq!(ranges[1].len(), 2);
        assert_eq!(ranges[2].len(), 2);
        assert_eq!(ranges[3].len(), 4);
    }

    #[test]
    fn test_plan_more_parts_than_bytes() {
        let ranges = plan(2, 4);
        // Leading parts collapse to empty; the tail picks up everything.
        assert!(ranges[1].is_empty());
        assert_eq!(ranges[3], PartRange { index: 3, start: 0, end: 2 });
        let covered: u64 = ranges.iter().map(PartRange::len).sum();
        assert_eq!(covered, 2);
    }

    #[test]
    fn test_remaining_after_partial_and_complete() {
        let range = PartRange { index: 1, start: 100, end: 200 };

        let remaining = range.remaining_after(40);
        assert_eq!(remaining.start, 140);
        assert_eq!(remaining.end, 200);

        assert!(range.remaining_after(100).is_empty());
        // An oversized part file never inverts the range.
        assert!(range.remaining_after(150).is_empty());
    }

    #[tokio::test]
    async fn test_bytes_on_disk_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        assert_eq!(bytes_on_disk(&path).await, 0);

        tokio::fs::write(&path, b"12345").await.unwrap();
        assert_eq!(bytes_on_disk(&path).await, 5);
    }
}
