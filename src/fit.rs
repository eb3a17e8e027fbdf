use crate::{MemAlloc, arena::Arena, heap::PROLOGUE};

impl<A: Arena> MemAlloc<A> {
    /// Returns the payload of a free block with at least `size` bytes, or None if the
    /// heap has no such block.
    ///
    /// This uses the next-fit algorithm. Instead of starting at the beginning of the
    /// heap every time, the search starts at the cursor, which sits where the last
    /// allocation or merge happened:
    ///
    /// ```text
    ///                      cursor
    ///                        |  1. cursor -> epilogue
    ///                        v------------------------->
    ///  +----------+-----+----+------+------+-----+----------+
    ///  | prologue | ... | .. | .... | .... | ... | epilogue |
    ///  +----------+-----+----+------+------+-----+----------+
    ///  -----------------------> 2. wrap: prologue -> cursor
    /// ```
    ///
    /// Low addresses that are full don't get scanned again and again on every call. The
    /// price is somewhat more fragmentation than best-fit. On a hit the cursor moves to
    /// the block found.
    pub(crate) fn find_fit(&mut self, size: usize) -> Option<usize> {
        let start = self.cursor;

        let found = self
            .fit_between(start, None, size)
            .or_else(|| self.fit_between(PROLOGUE, Some(start), size));

        if let Some(bp) = found {
            self.cursor = bp;
        }

        found
    }

    /// Walks from `bp` until `end` (exclusive) or the epilogue, whichever comes first.
    fn fit_between(&self, mut bp: usize, end: Option<usize>, size: usize) -> Option<usize> {
        while end.is_none_or(|end| bp < end) {
            let tag = self.heap.tag(bp);

            if tag.is_epilogue() {
                break;
            }

            if !tag.allocated && tag.size >= size {
                return Some(bp);
            }

            bp += tag.size;
        }

        None
    }
}
