//! A single outstanding block held by the ledger.

use core::fmt;
use core::num::NonZeroUsize;

use crate::{HumanSize, PhysicalAddress, PhysicalAllocator};

/// Identity of a reservation.
///
/// Identities are handed out in increasing order per ledger and never reused, even when
/// the allocator later returns the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ReservationId(u64);

impl ReservationId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// One live block of reserved physical memory.
///
/// Owns its allocator handle; the only way to give the memory back is
/// [`release`](Self::release), which consumes the reservation.
#[derive(Debug)]
pub(crate) struct Reservation<H> {
    id: ReservationId,
    size: NonZeroUsize,
    address: PhysicalAddress,
    handle: H,
}

impl<H> Reservation<H> {
    pub(crate) const fn new(
        id: ReservationId,
        size: NonZeroUsize,
        address: PhysicalAddress,
        handle: H,
    ) -> Self {
        Self {
            id,
            size,
            address,
            handle,
        }
    }

    pub(crate) const fn id(&self) -> ReservationId {
        self.id
    }

    pub(crate) const fn size(&self) -> NonZeroUsize {
        self.size
    }

    pub(crate) fn info(&self) -> ReservationInfo {
        ReservationInfo {
            id: self.id,
            size: self.size,
            address: self.address,
        }
    }

    /// Hands the block back to `allocator` and returns the identity it had.
    pub(crate) fn release<A>(self, allocator: &A) -> ReservationId
    where
        A: PhysicalAllocator<Handle = H> + ?Sized,
        H: fmt::Debug,
    {
        let Self {
            id,
            size,
            address,
            handle,
        } = self;
        log::info!(
            "free {}: {} at {} handle {:?}",
            id,
            HumanSize::from(size),
            address,
            handle
        );
        allocator.free(handle, size, address);
        id
    }
}

/// Read-only snapshot of a reservation, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: ReservationId,
    pub size: NonZeroUsize,
    pub address: PhysicalAddress,
}

impl fmt::Display for ReservationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}",
            self.id,
            HumanSize::from(self.size),
            self.address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_identity() {
        assert_eq!(format!("{}", ReservationId::new(7)), "r7");
    }

    #[test]
    fn formats_info() {
        let info = ReservationInfo {
            id: ReservationId::new(3),
            size: NonZeroUsize::new(100 << 20).unwrap(),
            address: PhysicalAddress::new(0x4000_0000),
        };
        assert_eq!(format!("{}", info), "r3: 100MiB at 0x40000000");
    }
}
