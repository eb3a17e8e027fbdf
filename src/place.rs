use crate::{
    MemAlloc,
    arena::Arena,
    block::{MIN_BLOCK_SIZE, Tag},
    heap::PROLOGUE,
};

impl<A: Arena> MemAlloc<A> {
    /// Turns the free block at `bp` into an allocated block of `size` bytes.
    ///
    /// If what's left over can hold a block on its own, the block is split and the
    /// remainder stays free:
    ///
    /// ```text
    /// +------------------------------+      +--------------+---------------+
    /// |         free (current)       |  ->  | used (size)  | free (rest)   |
    /// +------------------------------+      +--------------+---------------+
    /// ```
    ///
    /// Otherwise the whole block is handed out, and the few extra bytes are padding.
    /// The caller already checked that the block is big enough.
    pub(crate) fn place(&mut self, bp: usize, size: usize) {
        let current = self.heap.tag(bp).size;
        debug_assert!(current >= size, "placing {size} bytes into a {current} byte block");

        if current - size >= MIN_BLOCK_SIZE {
            self.heap.set_tag(bp, Tag::used(size));

            let rest = self.heap.next(bp);
            self.heap.set_tag(rest, Tag::free(current - size));

            self.cursor = rest;
        } else {
            self.heap.set_tag(bp, Tag::used(current));

            let next = self.heap.next(bp);
            self.cursor = if self.heap.tag(next).is_epilogue() { PROLOGUE } else { next };
        }
    }
}
