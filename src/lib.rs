//! # memalloc
//!
//! A `malloc`/`free`/`realloc` replacement that manages one growable [`Arena`].
//!
//! All the bookkeeping lives inside the arena itself. Every block carries a boundary
//! tag at both ends (see [`block`]), free blocks are found with a next-fit search that
//! resumes where the previous one stopped, and freed blocks are merged with their free
//! neighbours right away, so the heap never holds two free blocks in a row.
//!
//! ```text
//!  +-----+----------+-------+-------+-------------+-------+---------+----------+
//!  | pad | prologue | used  | free  |    used     | free  |   ...   | epilogue |
//!  +-----+----------+-------+-------+-------------+-------+---------+----------+
//!                                   ^
//!                                 cursor: next search starts here
//! ```
//!
//! Callers only hold [`Address`] handles and get at their bytes through
//! [`MemAlloc::payload`] and [`MemAlloc::payload_mut`].

pub mod arena;
pub mod block;
mod check;
mod coalesce;
pub mod config;
pub mod error;
mod fit;
mod heap;
mod kernel;
mod place;
pub mod trace;
pub mod utils;

use std::{cmp, fmt};

use tracing::{debug, error, trace, warn};

use crate::{
    block::{DOUBLE_WORD_SIZE, MAX_REQUEST, OVERHEAD, Tag, adjusted_size},
    heap::{Heap, PROLOGUE},
};

pub use crate::{
    arena::{Arena, MmapArena, VecArena},
    check::HeapStats,
    config::AllocatorConfig,
    error::{AllocError, Misuse},
};

/// Handle to an allocated block, as returned by [`MemAlloc::allocate`].
///
/// It is only meaningful for the allocator that produced it. [`Address::NULL`] never
/// names a block, so freeing it does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    /// The address no block ever has.
    pub const NULL: Address = Address(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Payload offset inside the arena.
    #[inline]
    pub(crate) fn offset(self) -> usize {
        self.0
    }
}

/// The allocator. It owns its arena and the next-fit cursor; nothing is global, so
/// several allocators can live side by side.
pub struct MemAlloc<A: Arena = VecArena> {
    /// Layout manager wrapping the arena.
    heap: Heap<A>,
    /// Payload offset of the block where the next search starts.
    cursor: usize,
    config: AllocatorConfig,
    /// `init` succeeded and the heap has a prologue and an epilogue.
    initialized: bool,
}

impl Default for MemAlloc<VecArena> {
    fn default() -> Self {
        Self::new(VecArena::default(), AllocatorConfig::default())
    }
}

impl<A: Arena> fmt::Debug for MemAlloc<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemAlloc")
            .field("arena_len", &self.heap.arena.len())
            .field("cursor", &self.cursor)
            .field("config", &self.config)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl<A: Arena> MemAlloc<A> {
    /// Creates an allocator over `arena`. Nothing is written to the arena until
    /// [`MemAlloc::init`] runs, either explicitly or on the first allocation.
    pub fn new(arena: A, config: AllocatorConfig) -> Self {
        Self {
            heap: Heap::new(arena),
            cursor: PROLOGUE,
            config,
            initialized: false,
        }
    }

    /// Creates an allocator with the default configuration.
    pub fn with_arena(arena: A) -> Self {
        Self::new(arena, AllocatorConfig::default())
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn arena(&self) -> &A {
        &self.heap.arena
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Resets the arena to an empty heap (prologue and epilogue only) and seeds it with
    /// one free block of `chunk_size` bytes. Every address handed out before is gone.
    pub fn init(&mut self) -> Result<(), AllocError> {
        self.initialized = false;

        self.heap.format()?;
        self.cursor = PROLOGUE;

        let bp = self.heap.grow(self.config.chunk_size)?;
        self.coalesce(bp);
        self.initialized = true;

        debug!(
            arena_len = self.heap.arena.len(),
            chunk = self.config.chunk_size,
            "heap initialized"
        );

        Ok(())
    }

    /// Allocates at least `size` bytes of payload. Returns `None` when `size` is zero or
    /// when the arena can't grow enough to fit the request.
    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        if size == 0 {
            return None;
        }

        match self.allocate_block(size) {
            Ok(bp) => {
                trace!(size, bp, "allocate");
                self.after("allocate");
                Some(Address(bp))
            }
            Err(err) => {
                warn!(size, %err, "allocation failed");
                None
            }
        }
    }

    /// Releases the block at `addr`. Freeing [`Address::NULL`] does nothing.
    ///
    /// Freeing anything else that is not a live block is undefined unless the allocator
    /// was configured with `validate`, in which case it is logged and ignored.
    pub fn free(&mut self, addr: Address) {
        if self.config.validate {
            if let Err(err) = self.try_free(addr) {
                warn!(%err, "ignoring invalid free");
            }
            return;
        }

        if addr.is_null() || !self.initialized {
            return;
        }

        self.release(addr.offset());
        trace!(bp = addr.offset(), "free");
        self.after("free");
    }

    /// `realloc`. Returns an address with room for `new_size` bytes whose first
    /// `min(old, new_size)` bytes match the old payload.
    ///
    /// Shrinking keeps the block as is. Growing first tries to absorb the free blocks
    /// right after this one, and only then falls back to allocate, copy and free. When
    /// that last allocation fails the old block is left untouched and `None` is returned.
    pub fn resize(&mut self, addr: Address, new_size: usize) -> Option<Address> {
        if self.config.validate {
            return match self.try_resize(addr, new_size) {
                Ok(addr) => Some(addr),
                Err(err) => {
                    warn!(%err, "resize failed");
                    None
                }
            };
        }

        match self.reallocate(addr, new_size) {
            Ok(new) => {
                trace!(from = addr.offset(), to = new.offset(), new_size, "resize");
                self.after("resize");
                Some(new)
            }
            Err(err) => {
                warn!(new_size, %err, "resize failed");
                None
            }
        }
    }

    /// Payload bytes of a live block.
    pub fn payload(&self, addr: Address) -> &[u8] {
        self.heap.payload(addr.offset())
    }

    /// Payload bytes of a live block.
    pub fn payload_mut(&mut self, addr: Address) -> &mut [u8] {
        self.heap.payload_mut(addr.offset())
    }

    /// How many payload bytes the block at `addr` really has. It can be more than what
    /// was asked for because of alignment and because small leftovers are never split off.
    pub fn usable_size(&self, addr: Address) -> usize {
        self.heap.tag(addr.offset()).size - OVERHEAD
    }

    /// Finds or makes room for `size` bytes and places an allocated block there.
    fn allocate_block(&mut self, size: usize) -> Result<usize, AllocError> {
        if size > MAX_REQUEST {
            return Err(AllocError::TooLarge { size });
        }

        if !self.initialized {
            self.init()?;
        }

        let needed = adjusted_size(size);

        let bp = match self.find_fit(needed) {
            Some(bp) => bp,
            None => self.extend(cmp::max(needed, self.config.chunk_size))?,
        };

        self.place(bp, needed);

        Ok(bp)
    }

    /// Grows the heap by at least `size` bytes and merges the new space with a free
    /// block that might end right before it. Returns the resulting free block.
    fn extend(&mut self, size: usize) -> Result<usize, AllocError> {
        // Keep the new block a whole number of double words.
        let size = utils::align(size, DOUBLE_WORD_SIZE);

        let bp = self.heap.grow(size)?;
        debug!(size, arena_len = self.heap.arena.len(), "heap extended");

        Ok(self.coalesce(bp))
    }

    /// Marks `bp` free and merges it with its neighbours.
    fn release(&mut self, bp: usize) {
        let size = self.heap.tag(bp).size;

        self.heap.set_tag(bp, Tag::free(size));
        self.coalesce(bp);
    }

    fn reallocate(&mut self, addr: Address, new_size: usize) -> Result<Address, AllocError> {
        if addr.is_null() || !self.initialized {
            return self.allocate_block(new_size).map(Address);
        }

        if new_size > MAX_REQUEST {
            return Err(AllocError::TooLarge { size: new_size });
        }

        let bp = addr.offset();
        let needed = new_size + OVERHEAD;
        let old_size = self.heap.tag(bp).size;

        if needed <= old_size {
            return Ok(addr);
        }

        // Walk the free blocks that follow and see if together they make enough room.
        // The epilogue is allocated, so this always stops at the end of the heap.
        let mut total = old_size;
        let mut next = self.heap.next(bp);
        let mut absorbed_cursor = false;

        loop {
            let tag = self.heap.tag(next);
            if tag.allocated {
                break;
            }

            total += tag.size;
            absorbed_cursor |= next == self.cursor;

            if needed <= total {
                self.heap.set_tag(bp, Tag::used(total));

                // The block the cursor pointed to is now part of ours.
                if absorbed_cursor {
                    self.cursor = bp;
                }

                return Ok(addr);
            }

            next += tag.size;
        }

        let new = self.allocate_block(new_size)?;
        let len = cmp::min(old_size - OVERHEAD, new_size);

        self.heap.copy_payload(bp, new, len);
        self.release(bp);

        Ok(Address(new))
    }

    /// Post operation hook. Runs the heap checker when the config asks for it.
    fn after(&self, op: &'static str) {
        if !self.config.check_heap {
            return;
        }

        if let Err(err) = self.check_heap() {
            error!(op, %err, "heap check failed");
        }
    }
}

impl MemAlloc<MmapArena> {
    /// Reserves an [`MmapArena`] of `limit` bytes and builds an allocator over it.
    pub fn mmap(limit: usize, config: AllocatorConfig) -> Result<Self, AllocError> {
        Ok(Self::new(MmapArena::reserve(limit)?, config))
    }

    /// Raw pointer to the payload of `addr`. The arena never moves, so the pointer stays
    /// valid until the block is freed, the allocator is re-initialized or dropped.
    pub fn as_ptr(&self, addr: Address) -> Option<std::ptr::NonNull<u8>> {
        if addr.is_null() || addr.offset() >= self.heap.arena.len() {
            return None;
        }

        // SAFETY: the offset is inside the mapped part of the arena.
        Some(unsafe { self.heap.arena.base().add(addr.offset()) })
    }
}
