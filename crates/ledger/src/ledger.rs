//! The reservation ledger.
//!
//! A [`Ledger`] owns every block it has reserved from a [`PhysicalAllocator`] and keeps them
//! in an order fixed by its [`OrderPolicy`]. All structural access goes through one
//! `spin::Mutex`:
//!
//! - `reserve` allocates without the lock held, then inserts under it. A failed allocation
//!   never touches the ledger.
//! - `release_one` and `release_all` remove and free under the lock, so no other operation
//!   can see an entry that is gone from the ledger but still allocated, or the reverse.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::reservation::Reservation;
use crate::{
    AllocError, HumanSize, PhysicalAllocator, ReservationId, ReservationInfo, SizeUnit,
};

/// Which reservation [`Ledger::release_one`] gives back.
///
/// There is deliberately no default; every ledger states its policy when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderPolicy {
    /// New reservations go to the head and are released first: undo the most recent one.
    Lifo,
    /// New reservations go to the tail; the oldest is released first.
    Fifo,
}

impl fmt::Display for OrderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPolicy::Lifo => f.write_str("lifo"),
            OrderPolicy::Fifo => f.write_str("fifo"),
        }
    }
}

/// Errors returned by ledger operations.
///
/// None of them leave the ledger changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The size is zero, or overflows once converted to bytes.
    #[error("invalid reservation size")]
    InvalidSize,
    /// The allocator could not provide a contiguous block of that size.
    #[error("no space left in the physical pool")]
    OutOfSpace,
    /// `release_one` was called with nothing reserved.
    #[error("nothing to release")]
    NothingToRelease,
}

impl From<AllocError> for LedgerError {
    fn from(_: AllocError) -> Self {
        LedgerError::OutOfSpace
    }
}

/// Ordered, lock-protected collection of live reservations.
///
/// Dropping a ledger releases everything it still holds.
pub struct Ledger<A: PhysicalAllocator> {
    allocator: A,
    policy: OrderPolicy,
    next_id: AtomicU64,
    entries: spin::Mutex<VecDeque<Reservation<A::Handle>>>,
}

impl<A: PhysicalAllocator> Ledger<A> {
    /// Creates an empty ledger drawing from `allocator`.
    pub fn new(allocator: A, policy: OrderPolicy) -> Self {
        Self {
            allocator,
            policy,
            next_id: AtomicU64::new(1),
            entries: spin::Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the ordering policy this ledger was created with.
    pub fn policy(&self) -> OrderPolicy {
        self.policy
    }

    /// Returns the allocator backing this ledger.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Reserves a contiguous block of `size` bytes.
    pub fn reserve(&self, size: usize) -> Result<ReservationId, LedgerError> {
        let size = NonZeroUsize::new(size).ok_or(LedgerError::InvalidSize)?;

        let allocation = self.allocator.allocate(size).map_err(|err| {
            log::warn!("reserve {} failed: {}", HumanSize::from(size), err);
            LedgerError::from(err)
        })?;

        let id = ReservationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::info!(
            "alloc {}: {} at {} handle {:?}",
            id,
            HumanSize::from(size),
            allocation.address,
            allocation.handle
        );

        let reservation = Reservation::new(id, size, allocation.address, allocation.handle);
        let mut entries = self.entries.lock();
        match self.policy {
            OrderPolicy::Lifo => entries.push_front(reservation),
            OrderPolicy::Fifo => entries.push_back(reservation),
        }

        Ok(id)
    }

    /// Reserves `count` blocks of `unit`, i.e. `count << unit.shift()` bytes.
    ///
    /// Fails with [`LedgerError::InvalidSize`] before touching the allocator if the
    /// byte count is zero or does not fit in a `usize`.
    pub fn reserve_in(&self, count: usize, unit: SizeUnit) -> Result<ReservationId, LedgerError> {
        let bytes = unit.to_bytes(count).ok_or(LedgerError::InvalidSize)?;
        self.reserve(bytes)
    }

    /// Releases one reservation, chosen by the ledger's [`OrderPolicy`].
    pub fn release_one(&self) -> Result<ReservationId, LedgerError> {
        let mut entries = self.entries.lock();
        let reservation = entries
            .pop_front()
            .ok_or(LedgerError::NothingToRelease)?;
        Ok(reservation.release(&self.allocator))
    }

    /// Releases every reservation and returns how many were freed.
    ///
    /// The lock is held for the whole clear, so a concurrent `reserve` lands either
    /// entirely before (and is released) or entirely after (and survives).
    pub fn release_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let expected = entries.len();
        let mut released = 0;
        let mut bytes = 0;

        while let Some(reservation) = entries.pop_front() {
            bytes += reservation.size().get();
            reservation.release(&self.allocator);
            released += 1;
        }

        debug_assert_eq!(released, expected);
        if released > 0 {
            log::info!("cleared {} reservations ({})", released, HumanSize(bytes));
        }
        released
    }

    /// Returns the number of live reservations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the total number of bytes requested by live reservations.
    pub fn reserved_bytes(&self) -> usize {
        self.entries.lock().iter().map(|r| r.size().get()).sum()
    }

    /// Returns a snapshot of the live reservations, in release order.
    ///
    /// The first entry is the one the next [`release_one`](Self::release_one) would free.
    pub fn reservations(&self) -> Vec<ReservationInfo> {
        self.entries.lock().iter().map(Reservation::info).collect()
    }

    /// Returns the identity [`release_one`](Self::release_one) would release next.
    pub fn peek(&self) -> Option<ReservationId> {
        self.entries.lock().front().map(Reservation::id)
    }
}

impl<A: PhysicalAllocator> Drop for Ledger<A> {
    fn drop(&mut self) {
        let remaining = self.entries.get_mut().len();
        if remaining > 0 {
            log::debug!("ledger dropped with {} live reservations", remaining);
            self.release_all();
        }
    }
}

impl<A: PhysicalAllocator> fmt::Debug for Ledger<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
