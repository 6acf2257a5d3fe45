#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! # Reservation ledger
//!
//! Carves large physically-contiguous blocks out of a reserved pool on demand and keeps
//! track of every one of them, so an operator can shrink the memory available to the rest
//! of the system step by step and give it back later. It provides:
//!
//! - [`Ledger`]: the ordered, lock-protected record of live reservations, with LIFO or FIFO
//!   release order.
//! - [`PhysicalAllocator`]: the capability a ledger draws blocks from.
//! - [`ContiguousPool`]: a first-fit, page-granular pool implementing that capability.
//! - [`HogControl`]: the reserve / undo / clear command layer operators drive.

extern crate alloc;

mod address;
mod allocator;
mod control;
mod human_size;
mod ledger;
mod pool;
mod reservation;

pub use address::PhysicalAddress;
pub use allocator::{AllocError, Allocation, PhysicalAllocator};
pub use control::{HogControl, Written};
pub use human_size::{HumanSize, SizeUnit};
pub use ledger::{Ledger, LedgerError, OrderPolicy};
pub use pool::{ContiguousPool, MemoryRegion, PAGE_SIZE, PoolHandle};
pub use reservation::{ReservationId, ReservationInfo};
