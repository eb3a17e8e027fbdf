use tracing::warn;

use crate::{
    arena::Arena,
    block::{DOUBLE_WORD_SIZE, MAX_BLOCK_SIZE, Tag, WORD_SIZE},
    error::AllocError,
};

/// Offset of the prologue payload. The arena starts with a padding word, then the
/// prologue header and footer, so the first payload offset is a double word aligned.
pub(crate) const PROLOGUE: usize = 2 * WORD_SIZE;

/// Bytes used by the fixed part of the heap: padding word, prologue and epilogue header.
pub(crate) const FRAME_SIZE: usize = 4 * WORD_SIZE;

/// Layout manager. It owns the [`Arena`] and knows how blocks are laid out inside
/// of it. Every block is addressed by the offset of its payload, `bp`:
///
/// ```text
///  0     4     8    12                                              len-4  len
///  +-----+-----+-----+------+-----------------+------+-----+ ... +------+
///  | pad | 8/1 | 8/1 | hdr  |     payload     | ftr  | hdr | ... | 0/1  |
///  +-----+-----+-----+------+-----------------+------+-----+ ... +------+
///        \ prologue  /      ^ bp                                 epilogue
/// ```
///
/// Navigation is plain offset arithmetic. Every word access goes through the arena's
/// byte slice, so a bad offset panics instead of scribbling over somebody else's memory.
pub(crate) struct Heap<A> {
    pub arena: A,
}

impl<A: Arena> Heap<A> {
    pub fn new(arena: A) -> Self {
        Self { arena }
    }

    #[inline]
    fn word(&self, at: usize) -> u32 {
        let bytes = &self.arena.as_bytes()[at..at + WORD_SIZE];

        u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn set_word(&mut self, at: usize, value: u32) {
        self.arena.as_bytes_mut()[at..at + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
    }

    #[inline]
    pub fn header(bp: usize) -> usize {
        bp - WORD_SIZE
    }

    #[inline]
    pub fn footer(&self, bp: usize) -> usize {
        bp + self.tag(bp).size - DOUBLE_WORD_SIZE
    }

    /// Tag stored in the header of `bp`.
    #[inline]
    pub fn tag(&self, bp: usize) -> Tag {
        Tag::unpack(self.word(Self::header(bp)))
    }

    /// Tag stored in the footer of `bp`.
    #[inline]
    pub fn footer_tag(&self, bp: usize) -> Tag {
        Tag::unpack(self.word(self.footer(bp)))
    }

    /// Writes `tag` to the header of `bp` and then to the footer that `tag.size` implies.
    #[inline]
    pub fn set_tag(&mut self, bp: usize, tag: Tag) {
        let packed = tag.pack();

        self.set_word(Self::header(bp), packed);
        self.set_word(bp + tag.size - DOUBLE_WORD_SIZE, packed);
    }

    /// Writes a header only. This is only for the epilogue, which has no footer.
    #[inline]
    pub fn set_epilogue(&mut self, bp: usize) {
        self.set_word(Self::header(bp), Tag::used(0).pack());
    }

    #[inline]
    pub fn next(&self, bp: usize) -> usize {
        bp + self.tag(bp).size
    }

    /// Payload of the block right before `bp`, found through that block's footer.
    #[inline]
    pub fn prev(&self, bp: usize) -> usize {
        bp - Tag::unpack(self.word(bp - DOUBLE_WORD_SIZE)).size
    }

    /// Whether the block right before `bp` is allocated, read from its footer.
    #[inline]
    pub fn prev_allocated(&self, bp: usize) -> bool {
        Tag::unpack(self.word(bp - DOUBLE_WORD_SIZE)).allocated
    }

    /// Payload of the epilogue. It sits right at the end of the arena.
    #[inline]
    pub fn epilogue(&self) -> usize {
        self.arena.len()
    }

    /// Lays out padding, prologue and epilogue on an empty arena.
    pub fn format(&mut self) -> Result<(), AllocError> {
        self.arena.reset();
        let base = self.arena.extend(FRAME_SIZE)?;
        debug_assert_eq!(base, 0);

        self.set_word(0, 0);
        self.set_tag(PROLOGUE, Tag::used(DOUBLE_WORD_SIZE));
        self.set_epilogue(FRAME_SIZE);

        Ok(())
    }

    /// Grows the arena by `size` bytes and turns them into one free block that starts
    /// where the old epilogue was. Returns the payload of that block, not coalesced yet.
    ///
    /// The arena never grows past [`MAX_BLOCK_SIZE`], so any run of merged blocks still
    /// fits in a tag.
    pub fn grow(&mut self, size: usize) -> Result<usize, AllocError> {
        let len = self.arena.len();

        if len.checked_add(size).is_none_or(|end| end > MAX_BLOCK_SIZE) {
            let available = MAX_BLOCK_SIZE.saturating_sub(len);
            warn!(requested = size, available, "heap reached the largest taggable size");
            return Err(AllocError::ArenaExhausted { requested: size, available });
        }

        let bp = self.arena.extend(size)?;

        // The old epilogue header becomes the header of the new block.
        self.set_tag(bp, Tag::free(size));
        self.set_epilogue(self.next(bp));

        Ok(bp)
    }

    /// Iterates over every block between the prologue and the epilogue.
    pub fn blocks(&self) -> Blocks<'_, A> {
        Blocks { heap: self, bp: self.next(PROLOGUE) }
    }

    /// Payload bytes of `bp`.
    pub fn payload(&self, bp: usize) -> &[u8] {
        let size = self.tag(bp).size;

        &self.arena.as_bytes()[bp..bp + size - DOUBLE_WORD_SIZE]
    }

    pub fn payload_mut(&mut self, bp: usize) -> &mut [u8] {
        let size = self.tag(bp).size;

        &mut self.arena.as_bytes_mut()[bp..bp + size - DOUBLE_WORD_SIZE]
    }

    /// Copies `len` payload bytes from `from` to `to`.
    pub fn copy_payload(&mut self, from: usize, to: usize, len: usize) {
        self.arena.as_bytes_mut().copy_within(from..from + len, to);
    }
}

/// Address ordered walk over the blocks of a [`Heap`]. It stops at the epilogue.
pub(crate) struct Blocks<'a, A> {
    heap: &'a Heap<A>,
    bp: usize,
}

impl<A: Arena> Iterator for Blocks<'_, A> {
    type Item = (usize, Tag);

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.heap.tag(self.bp);

        if tag.is_epilogue() {
            return None;
        }

        let bp = self.bp;
        self.bp += tag.size;

        Some((bp, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::VecArena;

    fn formatted() -> Heap<VecArena> {
        let mut heap = Heap::new(VecArena::with_limit(1024));
        heap.format().unwrap();
        heap
    }

    #[test]
    fn format_writes_prologue_and_epilogue() {
        let heap = formatted();

        assert_eq!(heap.arena.len(), FRAME_SIZE);
        assert_eq!(heap.tag(PROLOGUE), Tag::used(8));
        assert_eq!(heap.footer_tag(PROLOGUE), Tag::used(8));
        assert_eq!(heap.next(PROLOGUE), heap.epilogue());
        assert!(heap.tag(heap.epilogue()).is_epilogue());
        assert_eq!(heap.blocks().count(), 0);
    }

    #[test]
    fn grow_reuses_old_epilogue_header() {
        let mut heap = formatted();
        let bp = heap.grow(64).unwrap();

        assert_eq!(bp, FRAME_SIZE);
        assert_eq!(heap.tag(bp), Tag::free(64));
        assert_eq!(heap.footer_tag(bp), Tag::free(64));
        assert_eq!(heap.next(bp), heap.epilogue());
        assert_eq!(heap.prev(bp), PROLOGUE);
        assert!(heap.prev_allocated(bp));
    }

    #[test]
    fn navigation_is_symmetric() {
        let mut heap = formatted();
        let bp = heap.grow(96).unwrap();

        heap.set_tag(bp, Tag::used(32));
        heap.set_tag(bp + 32, Tag::free(64));

        let second = heap.next(bp);
        assert_eq!(second, bp + 32);
        assert_eq!(heap.prev(second), bp);
        assert!(heap.prev_allocated(second));
        assert_eq!(
            heap.blocks().collect::<Vec<_>>(),
            vec![(bp, Tag::used(32)), (second, Tag::free(64))]
        );
    }

    #[test]
    fn payload_excludes_boundary_tags() {
        let mut heap = formatted();
        let bp = heap.grow(32).unwrap();

        heap.payload_mut(bp).fill(0xEE);

        assert_eq!(heap.payload(bp).len(), 24);
        assert_eq!(heap.tag(bp), Tag::free(32));
        assert_eq!(heap.footer_tag(bp), Tag::free(32));
    }

    /// Arena that pretends to already hold `len` bytes and records whether it was asked
    /// for more.
    struct FarArena {
        len: usize,
        extended: bool,
    }

    impl Arena for FarArena {
        fn extend(&mut self, nbytes: usize) -> Result<usize, AllocError> {
            self.extended = true;
            let base = self.len;
            self.len += nbytes;
            Ok(base)
        }

        fn reset(&mut self) {
            self.len = 0;
        }

        fn len(&self) -> usize {
            self.len
        }

        fn as_bytes(&self) -> &[u8] {
            &[]
        }

        fn as_bytes_mut(&mut self) -> &mut [u8] {
            &mut []
        }
    }

    #[test]
    fn grow_stops_at_largest_taggable_size() {
        let mut heap = Heap::new(FarArena { len: MAX_BLOCK_SIZE - 8, extended: false });

        assert_eq!(
            heap.grow(16),
            Err(AllocError::ArenaExhausted { requested: 16, available: 8 })
        );
        assert_eq!(
            heap.grow(usize::MAX),
            Err(AllocError::ArenaExhausted { requested: usize::MAX, available: 8 })
        );
        assert!(!heap.arena.extended);
        assert_eq!(heap.arena.len(), MAX_BLOCK_SIZE - 8);
    }
}
