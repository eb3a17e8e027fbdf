use crate::{
    Address, MemAlloc,
    arena::Arena,
    block::{DOUBLE_WORD_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Tag, WORD_SIZE},
    error::{AllocError, Misuse},
    heap::PROLOGUE,
};

/// Snapshot of the heap produced by [`MemAlloc::check_heap`] and [`MemAlloc::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes obtained from the arena so far.
    pub arena_size: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    /// Sum of the sizes of allocated blocks, tags included.
    pub allocated_bytes: usize,
    /// Sum of the sizes of free blocks, tags included.
    pub free_bytes: usize,
    /// Size of the biggest free block, zero if there is none.
    pub largest_free: usize,
}

impl HeapStats {
    fn record(&mut self, tag: Tag) {
        if tag.allocated {
            self.allocated_blocks += 1;
            self.allocated_bytes += tag.size;
        } else {
            self.free_blocks += 1;
            self.free_bytes += tag.size;
            self.largest_free = self.largest_free.max(tag.size);
        }
    }
}

impl<A: Arena> MemAlloc<A> {
    /// Walks the whole heap and checks every invariant the allocator relies on:
    ///
    /// - header and footer of every block agree,
    /// - sizes are double word multiples and at least [`MIN_BLOCK_SIZE`],
    /// - there are never two free blocks in a row,
    /// - the cursor points at a block,
    /// - the blocks, prologue and epilogue exactly cover the arena.
    ///
    /// The first broken invariant is returned as [`AllocError::Corrupted`].
    pub fn check_heap(&self) -> Result<HeapStats, AllocError> {
        let len = self.heap.arena.len();
        let mut stats = HeapStats { arena_size: len, ..HeapStats::default() };

        if !self.initialized {
            return Ok(stats);
        }

        let corrupted = |offset, reason| Err(AllocError::Corrupted { offset, reason });

        if self.heap.tag(PROLOGUE) != Tag::used(DOUBLE_WORD_SIZE)
            || self.heap.footer_tag(PROLOGUE) != Tag::used(DOUBLE_WORD_SIZE)
        {
            return corrupted(PROLOGUE, "bad prologue");
        }

        let mut cursor_seen = self.cursor == PROLOGUE;
        let mut prev_free = false;
        let mut bp = self.heap.next(PROLOGUE);

        loop {
            if bp > len {
                return corrupted(bp, "block runs past the end of the arena");
            }

            let tag = self.heap.tag(bp);

            if tag.is_epilogue() {
                if !tag.allocated {
                    return corrupted(bp, "epilogue is not allocated");
                }
                if bp != len {
                    return corrupted(bp, "epilogue is not at the end of the arena");
                }
                break;
            }

            if bp % DOUBLE_WORD_SIZE != 0 {
                return corrupted(bp, "payload is not double word aligned");
            }
            if tag.size % DOUBLE_WORD_SIZE != 0 || tag.size < MIN_BLOCK_SIZE {
                return corrupted(bp, "bad block size");
            }
            if bp + tag.size > len {
                return corrupted(bp, "block runs past the end of the arena");
            }
            if self.heap.footer_tag(bp) != tag {
                return corrupted(bp, "header and footer disagree");
            }
            if prev_free && !tag.allocated {
                return corrupted(bp, "two free blocks in a row");
            }

            cursor_seen |= bp == self.cursor;
            prev_free = !tag.allocated;
            stats.record(tag);

            bp += tag.size;
        }

        if !cursor_seen {
            return corrupted(self.cursor, "cursor does not point at a block");
        }

        // Padding word, prologue, blocks and epilogue header must add up to the arena.
        let covered =
            WORD_SIZE + DOUBLE_WORD_SIZE + stats.allocated_bytes + stats.free_bytes + WORD_SIZE;
        if covered != len {
            return corrupted(len, "blocks don't cover the arena");
        }

        Ok(stats)
    }

    /// Same numbers as [`MemAlloc::check_heap`], without failing on a broken heap.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats { arena_size: self.heap.arena.len(), ..HeapStats::default() };

        if self.initialized {
            self.heap.blocks().for_each(|(_, tag)| stats.record(tag));
        }

        stats
    }

    /// Checks that `addr` is the payload of a block in this heap and returns its tag.
    fn lookup(&self, addr: Address) -> Result<Tag, AllocError> {
        let not_a_block = AllocError::Misuse { offset: addr.offset(), kind: Misuse::NotABlock };

        if !self.initialized || addr.offset() >= self.heap.epilogue() {
            return Err(not_a_block);
        }

        self.heap
            .blocks()
            .take_while(|&(bp, _)| bp <= addr.offset())
            .find(|&(bp, _)| bp == addr.offset())
            .map(|(_, tag)| tag)
            .ok_or(not_a_block)
    }

    /// Checks that `addr` names a live block.
    fn validate(&self, addr: Address) -> Result<Tag, AllocError> {
        let tag = self.lookup(addr)?;

        if !tag.allocated {
            return Err(AllocError::Misuse { offset: addr.offset(), kind: Misuse::DoubleFree });
        }

        Ok(tag)
    }

    /// Validated [`MemAlloc::free`]. Freeing [`Address::NULL`] is fine; freeing anything
    /// that is not a live block is reported instead of corrupting the heap.
    pub fn try_free(&mut self, addr: Address) -> Result<(), AllocError> {
        if addr.is_null() {
            return Ok(());
        }

        self.validate(addr)?;
        self.release(addr.offset());
        self.after("free");

        Ok(())
    }

    /// Validated [`MemAlloc::resize`]. Resizing [`Address::NULL`] allocates; resizing to
    /// zero bytes or resizing something that is not a live block is reported.
    pub fn try_resize(&mut self, addr: Address, new_size: usize) -> Result<Address, AllocError> {
        if new_size == 0 {
            return Err(AllocError::Misuse { offset: addr.offset(), kind: Misuse::ZeroSizeResize });
        }

        if !addr.is_null() {
            self.validate(addr)?;
        }

        let new = self.reallocate(addr, new_size)?;
        self.after("resize");

        Ok(new)
    }

    /// Payload size of `addr` after validating it, for callers in validated mode.
    pub fn try_usable_size(&self, addr: Address) -> Result<usize, AllocError> {
        Ok(self.validate(addr)?.size - OVERHEAD)
    }
}
