//! The capability the ledger consumes to obtain and return physical blocks.

use core::fmt;
use core::num::NonZeroUsize;

use crate::PhysicalAddress;

/// Errors reported by a [`PhysicalAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// No free range is large enough for the request.
    #[error("no contiguous range large enough")]
    OutOfMemory,
    /// The request cannot be represented once rounded to the allocator's granularity.
    #[error("request too large for the allocator's granularity")]
    TooLarge,
}

/// A block handed out by a [`PhysicalAllocator`].
#[derive(Debug)]
pub struct Allocation<H> {
    /// Token required to give the block back.
    pub handle: H,
    /// Where the block starts.
    pub address: PhysicalAddress,
}

/// Source of physically-contiguous blocks.
///
/// Implementations must be safe to call concurrently from several threads; both methods
/// take `&self`. The handle type should not be `Clone`, so that the only way to free a
/// block is to give up the one handle that names it.
pub trait PhysicalAllocator {
    /// Opaque token identifying one live block.
    type Handle: fmt::Debug;

    /// Allocates a contiguous block of at least `size` bytes.
    fn allocate(&self, size: NonZeroUsize) -> Result<Allocation<Self::Handle>, AllocError>;

    /// Returns a block obtained from [`allocate`](Self::allocate).
    ///
    /// `size` and `address` must be the values the block was allocated with. Freeing a
    /// valid handle cannot fail; implementations treat a mismatch as a fatal bug.
    fn free(&self, handle: Self::Handle, size: NonZeroUsize, address: PhysicalAddress);
}

impl<T: PhysicalAllocator + ?Sized> PhysicalAllocator for &T {
    type Handle = T::Handle;

    #[inline]
    fn allocate(&self, size: NonZeroUsize) -> Result<Allocation<Self::Handle>, AllocError> {
        (**self).allocate(size)
    }

    #[inline]
    fn free(&self, handle: Self::Handle, size: NonZeroUsize, address: PhysicalAddress) {
        (**self).free(handle, size, address)
    }
}
