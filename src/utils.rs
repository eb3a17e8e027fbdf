//! Helper functions for the allocator that don't belong to any concrete module.

/// It aligns `to_be_aligned` up to the next multiple of `aligment`, which must be a power of two.
///
/// Block sizes are aligned to [`crate::block::DOUBLE_WORD_SIZE`] so every payload starts on an
/// 8 byte boundary, and [`crate::arena::MmapArena`] reservations are aligned to the page size.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`], but returns None instead of overflowing when `to_be_aligned` is
/// too close to `usize::MAX`. Use this one on sizes that come straight from the caller.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    Some(to_be_aligned.checked_add(aligment - 1)? & !(aligment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DOUBLE_WORD_SIZE;

    #[test]
    fn align_double_word() {
        let aligments = vec![(1..9, 8), (9..17, 16), (17..25, 24), (25..33, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, DOUBLE_WORD_SIZE));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4097, 4096), (4097..8193, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn checked_align_reports_overflow() {
        assert_eq!(checked_align(13, DOUBLE_WORD_SIZE), Some(16));
        assert_eq!(checked_align(usize::MAX - 7, DOUBLE_WORD_SIZE), Some(usize::MAX - 7));
        assert_eq!(checked_align(usize::MAX, DOUBLE_WORD_SIZE), None);
        assert_eq!(checked_align(usize::MAX - 6, 4096), None);
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(0, align(0, DOUBLE_WORD_SIZE));
    }
}
