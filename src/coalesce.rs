use crate::{MemAlloc, arena::Arena, block::Tag};

impl<A: Arena> MemAlloc<A> {
    /// Merges the free block `bp` with the blocks around it if they are free too, and
    /// returns the payload of the merged block. The cursor moves to that block, so it
    /// never points into the middle of a block that no longer exists on its own.
    ///
    /// The previous block is found through its footer and the next one through our own
    /// size. The prologue and the epilogue are always allocated, so neither lookup
    /// leaves the heap:
    ///
    /// ```text
    ///  prev   bp    next
    ///  used  free   used   ->  nothing to do
    ///  used  free   free   ->  bp grows over next
    ///  free  free   used   ->  prev grows over bp
    ///  free  free   free   ->  prev grows over bp and next
    /// ```
    pub(crate) fn coalesce(&mut self, bp: usize) -> usize {
        let prev_allocated = self.heap.prev_allocated(bp);
        let next = self.heap.tag(self.heap.next(bp));
        let size = self.heap.tag(bp).size;

        let merged = match (prev_allocated, next.allocated) {
            (true, true) => bp,
            (true, false) => {
                self.heap.set_tag(bp, Tag::free(size + next.size));
                bp
            }
            (false, true) => {
                let prev = self.heap.prev(bp);
                let prev_size = self.heap.tag(prev).size;

                self.heap.set_tag(prev, Tag::free(prev_size + size));
                prev
            }
            (false, false) => {
                let prev = self.heap.prev(bp);
                let prev_size = self.heap.tag(prev).size;

                self.heap.set_tag(prev, Tag::free(prev_size + size + next.size));
                prev
            }
        };

        self.cursor = merged;

        merged
    }
}

#[cfg(test)]
mod tests {
    use crate::{Address, AllocatorConfig, MemAlloc, VecArena, block::Tag};

    /// Four 72 byte blocks followed by the free rest of the seed chunk.
    fn four_blocks() -> (MemAlloc, [Address; 4]) {
        let mut alloc = MemAlloc::new(VecArena::with_limit(1 << 16), AllocatorConfig::default());
        alloc.init().unwrap();

        let blocks = [(); 4].map(|_| alloc.allocate(64).unwrap());

        (alloc, blocks)
    }

    #[test]
    fn no_free_neighbours() {
        let (mut alloc, [_, b, _, _]) = four_blocks();

        alloc.free(b);

        assert_eq!(alloc.heap.tag(b.offset()), Tag::free(72));
        assert_eq!(alloc.cursor, b.offset());
    }

    #[test]
    fn merge_with_next() {
        let (mut alloc, [_, b, c, _]) = four_blocks();

        alloc.free(c);
        alloc.free(b);

        assert_eq!(alloc.heap.tag(b.offset()), Tag::free(144));
        assert_eq!(alloc.heap.footer_tag(b.offset()), Tag::free(144));
        assert_eq!(alloc.cursor, b.offset());
    }

    #[test]
    fn merge_with_prev() {
        let (mut alloc, [_, b, c, _]) = four_blocks();

        alloc.free(b);
        alloc.free(c);

        assert_eq!(alloc.heap.tag(b.offset()), Tag::free(144));
        assert_eq!(alloc.heap.footer_tag(b.offset()), Tag::free(144));
        assert_eq!(alloc.cursor, b.offset());
    }

    #[test]
    fn merge_with_both() {
        let (mut alloc, [a, b, c, _]) = four_blocks();

        alloc.free(a);
        alloc.free(c);
        alloc.free(b);

        assert_eq!(alloc.heap.tag(a.offset()), Tag::free(216));
        assert_eq!(alloc.heap.footer_tag(a.offset()), Tag::free(216));
        assert_eq!(alloc.cursor, a.offset());
        assert_eq!(alloc.check_heap().unwrap().free_blocks, 2);
    }

    #[test]
    fn last_block_merges_with_free_tail() {
        let (mut alloc, [.., d]) = four_blocks();

        alloc.free(d);

        assert_eq!(alloc.heap.tag(d.offset()), Tag::free(4096 - 3 * 72));
        assert_eq!(alloc.heap.next(d.offset()), alloc.heap.epilogue());
    }
}
