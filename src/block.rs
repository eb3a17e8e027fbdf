/// Size of a word in bytes. Headers and footers are one word each.
pub(crate) const WORD_SIZE: usize = 4;

/// Size of a double word in bytes. Every block size and payload offset is a multiple of this.
pub(crate) const DOUBLE_WORD_SIZE: usize = 8;

/// Bytes a block spends on metadata: one header word plus one footer word.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block we ever create. A block of this size holds a header, a footer and
/// 8 bytes of payload.
pub const MIN_BLOCK_SIZE: usize = 2 * DOUBLE_WORD_SIZE;

/// Largest block a one word tag can describe.
pub(crate) const MAX_BLOCK_SIZE: usize = u32::MAX as usize & !0x7;

/// Largest payload `allocate` accepts.
pub(crate) const MAX_REQUEST: usize = MAX_BLOCK_SIZE - OVERHEAD;

/// Low bit of a packed tag.
const ALLOCATED_BIT: u32 = 0x1;

/// Boundary tag of a block. This is what we store both in the header and in the footer
/// of every block, packed in a single word:
///
/// ```text
///  31                                   3   2   1   0
/// +---------------------------------------+---+---+---+
/// |            block size (bytes)         | 0 | 0 | a |
/// +---------------------------------------+---+---+---+
/// ```
///
/// Since sizes are always a multiple of [`DOUBLE_WORD_SIZE`], the three low bits are free and
/// we keep the allocated flag `a` in the lowest one.
///
/// A block looks like this in the arena:
///
/// ```text
///            +---------------------+ <------+
///            |    header (tag)     |        | -> 1 word
/// bp ------> +---------------------+ <------+
///            |       Payload       |        |
///            |         ...         |        | -> size - OVERHEAD bytes
///            |         ...         |        |
///            +---------------------+ <------+
///            |    footer (tag)     |        | -> 1 word
///            +---------------------+ <------+
/// ```
///
/// The footer duplicates the header so that the block *after* this one can find where we
/// start by reading the word right before its own header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
    /// Total size of the block, header and footer included.
    pub size: usize,
    /// Whether the block is in use.
    pub allocated: bool,
}

impl Tag {
    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    #[inline]
    pub const fn free(size: usize) -> Self {
        Self::new(size, false)
    }

    #[inline]
    pub const fn used(size: usize) -> Self {
        Self::new(size, true)
    }

    /// Packs the tag into its one word representation.
    #[inline]
    pub fn pack(self) -> u32 {
        debug_assert!(self.size % DOUBLE_WORD_SIZE == 0, "unaligned block size {}", self.size);
        debug_assert!(self.size <= u32::MAX as usize, "block size {} overflows a word", self.size);

        self.size as u32 | if self.allocated { ALLOCATED_BIT } else { 0 }
    }

    #[inline]
    pub fn unpack(word: u32) -> Self {
        Self {
            size: (word & !0x7) as usize,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    /// The epilogue is the only block with size zero.
    #[inline]
    pub fn is_epilogue(self) -> bool {
        self.size == 0
    }
}

/// Block size needed to serve a request of `size` payload bytes.
///
/// Small requests get [`MIN_BLOCK_SIZE`]; anything else gets room for the payload plus
/// [`OVERHEAD`], rounded up to a double word.
#[inline]
pub(crate) fn adjusted_size(size: usize) -> usize {
    if size <= DOUBLE_WORD_SIZE {
        MIN_BLOCK_SIZE
    } else {
        crate::utils::align(size + OVERHEAD, DOUBLE_WORD_SIZE)
    }
}
