//! Arena providers.
//!
//! The allocator never asks the kernel for memory itself. It sees one contiguous
//! byte region that can only grow at the end, like the program break moved by
//! `sbrk`. Everything inside that region is addressed by offset from its start.
//!
//! ```text
//!  offset 0                                   len()           limit
//!  +-----------------------------------------+ - - - - - - - - +
//!  |        bytes handed out so far          |   not yet ours  |
//!  +-----------------------------------------+ - - - - - - - - +
//!                                            ^
//!                                  extend(n) returns this offset
//! ```

use std::{fmt, ptr::NonNull};

use tracing::{debug, warn};

use crate::{error::AllocError, kernel, utils::checked_align};

/// Default upper bound for an arena, 20 MiB.
pub const DEFAULT_ARENA_LIMIT: usize = 20 * (1 << 20);

/// Contiguous, growable byte region consumed by [`crate::MemAlloc`].
pub trait Arena {
    /// Grows the arena by exactly `nbytes` and returns the offset where the new
    /// bytes begin. A failed call must leave the arena unchanged.
    fn extend(&mut self, nbytes: usize) -> Result<usize, AllocError>;

    /// Shrinks the arena back to zero bytes. Only used when the allocator is
    /// (re)initialized.
    fn reset(&mut self);

    /// Current size of the arena in bytes.
    fn len(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole arena, `len()` bytes long.
    fn as_bytes(&self) -> &[u8];

    /// The whole arena, `len()` bytes long.
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// Arena backed by a `Vec<u8>` with a fixed upper bound.
pub struct VecArena {
    bytes: Vec<u8>,
    limit: usize,
}

impl VecArena {
    /// Creates an empty arena that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { bytes: Vec::new(), limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecArena {
    fn default() -> Self {
        Self::with_limit(DEFAULT_ARENA_LIMIT)
    }
}

impl fmt::Debug for VecArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecArena")
            .field("len", &self.bytes.len())
            .field("limit", &self.limit)
            .finish()
    }
}

impl Arena for VecArena {
    fn extend(&mut self, nbytes: usize) -> Result<usize, AllocError> {
        let base = self.bytes.len();
        let available = self.limit - base;

        if nbytes > available {
            warn!(requested = nbytes, available, "vec arena exhausted");
            return Err(AllocError::ArenaExhausted { requested: nbytes, available });
        }

        self.bytes.resize(base + nbytes, 0);

        Ok(base)
    }

    fn reset(&mut self) {
        self.bytes.clear();
    }

    #[inline]
    fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Arena backed by one region reserved from the kernel up front.
///
/// The whole `limit` is mapped when the arena is created and a break offset moves
/// through it as the arena grows, so the bytes never move and offsets can be turned
/// into stable pointers with [`MmapArena::base`]. The region goes back to the kernel
/// when the arena is dropped.
///
/// ```text
/// start                    brk                        start + limit
///   +-----------------------+----------------------------+
///   |      arena bytes      |   reserved, not yet used   |
///   +-----------------------+----------------------------+
/// ```
pub struct MmapArena {
    /// Start of the region returned by the kernel.
    start: NonNull<u8>,
    /// Current end of the arena, as an offset from `start`.
    brk: usize,
    /// Size of the reserved region, a multiple of the page size.
    limit: usize,
}

impl MmapArena {
    /// Reserves `limit` bytes (rounded up to the page size) from the kernel.
    pub fn reserve(limit: usize) -> Result<Self, AllocError> {
        let limit = checked_align(limit.max(1), kernel::page_size())
            .ok_or(AllocError::Reserve { len: limit })?;

        // SAFETY: `limit` is a non-zero multiple of the page size.
        let start = unsafe { kernel::request_memory(limit) }
            .ok_or(AllocError::Reserve { len: limit })?;

        debug!(limit, start = ?start, "reserved mmap arena");

        Ok(Self { start, brk: 0, limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Address of offset zero. Valid for as long as the arena lives.
    pub fn base(&self) -> NonNull<u8> {
        self.start
    }
}

impl fmt::Debug for MmapArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapArena")
            .field("start", &self.start)
            .field("brk", &self.brk)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Arena for MmapArena {
    fn extend(&mut self, nbytes: usize) -> Result<usize, AllocError> {
        let base = self.brk;
        let available = self.limit - base;

        if nbytes > available {
            warn!(requested = nbytes, available, "mmap arena exhausted");
            return Err(AllocError::ArenaExhausted { requested: nbytes, available });
        }

        self.brk += nbytes;

        Ok(base)
    }

    fn reset(&mut self) {
        // Stale bytes from a previous run are harmless: the allocator writes every tag
        // it reads and never promises zeroed payloads.
        self.brk = 0;
    }

    #[inline]
    fn len(&self) -> usize {
        self.brk
    }

    #[inline]
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `start..start + limit` is mapped read-write for the lifetime of `self`
        // and `brk <= limit`.
        unsafe { std::slice::from_raw_parts(self.start.as_ptr(), self.brk) }
    }

    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: same as `as_bytes`, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.start.as_ptr(), self.brk) }
    }
}

impl Drop for MmapArena {
    fn drop(&mut self) {
        // SAFETY: `start` and `limit` describe the region we got in `reserve`, and
        // nothing can borrow from it once we're being dropped.
        unsafe { kernel::return_memory(self.start, self.limit) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_arena_extend_returns_old_end() {
        let mut arena = VecArena::with_limit(64);

        assert!(arena.is_empty());
        assert_eq!(arena.extend(16), Ok(0));
        assert_eq!(arena.extend(24), Ok(16));
        assert_eq!(arena.len(), 40);
        assert_eq!(arena.as_bytes().len(), 40);
    }

    #[test]
    fn vec_arena_failed_extend_leaves_arena_unchanged() {
        let mut arena = VecArena::with_limit(32);
        arena.extend(24).unwrap();

        assert_eq!(
            arena.extend(16),
            Err(AllocError::ArenaExhausted { requested: 16, available: 8 })
        );
        assert_eq!(arena.len(), 24);
        assert_eq!(arena.extend(8), Ok(24));
    }

    #[test]
    fn vec_arena_reset_empties_it() {
        let mut arena = VecArena::default();
        arena.extend(128).unwrap();
        arena.reset();

        assert_eq!(arena.len(), 0);
        assert_eq!(arena.limit(), DEFAULT_ARENA_LIMIT);
    }

    #[test]
    fn mmap_arena_rounds_limit_to_page() {
        let arena = MmapArena::reserve(1).unwrap();

        assert_eq!(arena.limit(), kernel::page_size());
        assert!(arena.is_empty());
    }

    #[test]
    fn mmap_arena_reports_unrepresentable_limit() {
        assert_eq!(
            MmapArena::reserve(usize::MAX).unwrap_err(),
            AllocError::Reserve { len: usize::MAX }
        );
    }

    #[test]
    fn mmap_arena_bytes_are_stable_across_extend() {
        let mut arena = MmapArena::reserve(2 * kernel::page_size()).unwrap();
        let base = arena.base();

        arena.extend(8).unwrap();
        arena.as_bytes_mut()[..8].copy_from_slice(b"boundary");

        arena.extend(kernel::page_size()).unwrap();

        assert_eq!(arena.base(), base);
        assert_eq!(&arena.as_bytes()[..8], b"boundary");
    }

    #[test]
    fn mmap_arena_refuses_past_limit() {
        let mut arena = MmapArena::reserve(kernel::page_size()).unwrap();
        let limit = arena.limit();

        assert_eq!(arena.extend(limit), Ok(0));
        assert_eq!(
            arena.extend(8),
            Err(AllocError::ArenaExhausted { requested: 8, available: 0 })
        );
    }
}
