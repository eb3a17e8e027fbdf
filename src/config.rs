use crate::{
    block::{DOUBLE_WORD_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
    utils::align,
};

/// Default number of bytes the heap grows by when no free block fits (4 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Tunables for [`crate::MemAlloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Minimum number of bytes to request from the arena on every extension.
    /// Also the size of the free block seeded by `init`.
    pub chunk_size: usize,
    /// Route `free` and `resize` through the validated path, so misuse is
    /// logged and ignored instead of corrupting the heap.
    pub validate: bool,
    /// Run the heap checker after every public operation.
    pub check_heap: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            validate: false,
            check_heap: false,
        }
    }
}

impl AllocatorConfig {
    /// Sets the extension chunk. It is rounded up to a double word and kept between
    /// [`MIN_BLOCK_SIZE`] and the largest block a tag can describe.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
        self.chunk_size = align(chunk_size, DOUBLE_WORD_SIZE);
        self
    }

    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_check_heap(mut self, check_heap: bool) -> Self {
        self.check_heap = check_heap;
        self
    }

    /// Everything on: validated frees and resizes plus a full heap check per call.
    pub fn debug() -> Self {
        Self::default().with_validate(true).with_check_heap(true)
    }
}
