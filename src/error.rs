//! Error types for the allocator.
//!
//! The fast path (`allocate`, `free`, `resize`) reports failure as `None`, just like
//! `malloc` reports it as `NULL`. Everything that can say *why* it failed returns an
//! [`AllocError`] instead.

use thiserror::Error;

/// The main error type for allocator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The arena provider refused to grow any further.
    #[error("arena exhausted: requested {requested} bytes, {available} bytes available")]
    ArenaExhausted {
        /// Number of bytes the allocator asked the provider for.
        requested: usize,
        /// Number of bytes the provider could still hand out.
        available: usize,
    },

    /// The request can't be described by a block tag.
    #[error("request of {size} bytes exceeds the largest block")]
    TooLarge {
        /// Requested payload size.
        size: usize,
    },

    /// The platform refused to reserve the memory backing an arena.
    #[error("platform refused to reserve {len} bytes")]
    Reserve {
        /// Length of the reservation.
        len: usize,
    },

    /// The caller handed the allocator something it did not give out.
    #[error("misuse at offset {offset}: {kind}")]
    Misuse {
        /// Arena offset of the offending address.
        offset: usize,
        /// What was wrong with it.
        kind: Misuse,
    },

    /// The heap checker found a broken invariant.
    #[error("heap corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Payload offset of the first bad block.
        offset: usize,
        /// Which invariant broke.
        reason: &'static str,
    },
}

/// Kinds of caller misuse detected in validated mode.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// The address is not the payload of any block in the heap.
    #[error("address is not a block payload")]
    NotABlock,
    /// The block is already free.
    #[error("block is already free")]
    DoubleFree,
    /// A resize to zero bytes.
    #[error("resize to zero bytes")]
    ZeroSizeResize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = AllocError::ArenaExhausted { requested: 4096, available: 12 };
        assert_eq!(err.to_string(), "arena exhausted: requested 4096 bytes, 12 bytes available");

        let err = AllocError::Misuse { offset: 24, kind: Misuse::DoubleFree };
        assert_eq!(err.to_string(), "misuse at offset 24: block is already free");
        assert_eq!(Misuse::NotABlock.to_string(), "address is not a block payload");
    }
}
