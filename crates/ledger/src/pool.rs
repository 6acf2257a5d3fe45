//! First-fit contiguous pool over a reserved physical range.
//!
//! This is the allocator the ledger draws from when no platform DMA pool is available. It
//! keeps a sorted list of free ranges; an allocation carves pages off the front of the first
//! range that fits, and a free puts the range back, merging with its neighbours.

use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroUsize;

use crate::{AllocError, Allocation, HumanSize, PhysicalAddress, PhysicalAllocator};

/// Granularity of every pool allocation.
pub const PAGE_SIZE: usize = 4096;

/// A contiguous range of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    base: PhysicalAddress,
    size: usize,
}

impl MemoryRegion {
    /// Creates a new memory region.
    pub const fn new(base: PhysicalAddress, size: usize) -> Self {
        Self { base, size }
    }

    /// Returns the base address of this region.
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Returns the size of this region in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the end address (exclusive) of this region.
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_usize() + self.size)
    }

    /// Returns true if this region overlaps with another region.
    pub const fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base.as_usize() < other.end().as_usize()
            && other.base.as_usize() < self.end().as_usize()
    }

    /// Returns true if this region is adjacent to another region.
    pub const fn adjacent(&self, other: &MemoryRegion) -> bool {
        self.end().as_usize() == other.base.as_usize()
            || other.end().as_usize() == self.base.as_usize()
    }

    /// Shrinks `[base, base + size)` inward to whole pages.
    ///
    /// Returns `None` if nothing page-sized is left, or if the range wraps.
    fn page_aligned(base: PhysicalAddress, size: usize) -> Option<MemoryRegion> {
        let end = base.checked_add(size)?.align_down(PAGE_SIZE);
        let start = base.checked_align_up(PAGE_SIZE)?;
        if end <= start {
            return None;
        }
        Some(MemoryRegion::new(start, end - start))
    }
}

/// Sorted, non-overlapping, non-adjacent list of free ranges.
#[derive(Debug, Default)]
struct FreeList {
    regions: Vec<MemoryRegion>,
}

impl FreeList {
    fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    fn total_size(&self) -> usize {
        self.iter().map(|r| r.size()).sum()
    }

    fn overlaps(&self, region: &MemoryRegion) -> bool {
        self.iter().any(|r| r.overlaps(region))
    }

    /// Inserts a range, merging it with any neighbour it touches.
    ///
    /// The caller guarantees the range does not overlap anything already free.
    fn insert(&mut self, region: MemoryRegion) {
        let index = self
            .regions
            .partition_point(|r| r.base() < region.base());

        let mut merged = region;
        let merges_next = self
            .regions
            .get(index)
            .is_some_and(|next| merged.adjacent(next));
        if merges_next {
            let next = self.regions.remove(index);
            merged = MemoryRegion::new(merged.base(), merged.size() + next.size());
        }

        let merges_prev = index > 0 && self.regions[index - 1].adjacent(&merged);
        if merges_prev {
            let prev = &mut self.regions[index - 1];
            *prev = MemoryRegion::new(prev.base(), prev.size() + merged.size());
        } else {
            self.regions.insert(index, merged);
        }
    }

    /// Takes `size` bytes from the front of the first range large enough.
    fn take_first_fit(&mut self, size: usize) -> Option<MemoryRegion> {
        let index = self.regions.iter().position(|r| r.size() >= size)?;
        let candidate = self.regions[index];
        if candidate.size() == size {
            self.regions.remove(index);
        } else {
            self.regions[index] = MemoryRegion::new(candidate.base() + size, candidate.size() - size);
        }
        Some(MemoryRegion::new(candidate.base(), size))
    }
}

/// Token for one live block in a [`ContiguousPool`].
///
/// Not `Clone`: the pool gets it back exactly once.
#[derive(PartialEq, Eq)]
pub struct PoolHandle {
    serial: u64,
    region: MemoryRegion,
    requested: NonZeroUsize,
}

impl PoolHandle {
    /// The page-rounded range backing this block.
    pub fn region(&self) -> MemoryRegion {
        self.region
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolHandle(#{} {}..{})", self.serial, self.region.base(), self.region.end())
    }
}

impl fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.serial)
    }
}

#[derive(Debug, Default)]
struct PoolState {
    managed: Vec<MemoryRegion>,
    free: FreeList,
    total: usize,
    allocated: usize,
    live: usize,
    next_serial: u64,
}

/// A page-granular, first-fit allocator over one or more reserved physical ranges.
///
/// # Thread Safety
///
/// All bookkeeping lives behind a single `spin::Mutex`, so [`allocate`](PhysicalAllocator::allocate)
/// and [`free`](PhysicalAllocator::free) only need `&self`. Critical sections cover a walk
/// of the free list and nothing else.
#[derive(Debug, Default)]
pub struct ContiguousPool {
    state: spin::Mutex<PoolState>,
}

impl ContiguousPool {
    /// Creates a pool covering `[base, base + size)`, shrunk inward to page boundaries.
    pub fn new(base: PhysicalAddress, size: usize) -> Self {
        let mut pool = Self::default();
        pool.add_region(base, size);
        pool
    }

    /// Adds another usable range to the pool.
    ///
    /// The range is shrunk inward to page boundaries; anything overlapping memory the pool
    /// already manages is ignored with a warning.
    pub fn add_region(&mut self, base: PhysicalAddress, size: usize) {
        let Some(region) = MemoryRegion::page_aligned(base, size) else {
            log::debug!("pool: ignoring sub-page region at {} ({})", base, HumanSize(size));
            return;
        };

        let state = self.state.get_mut();
        if state.managed.iter().any(|r| r.overlaps(&region)) {
            log::warn!(
                "pool: region {}..{} overlaps managed memory, ignoring",
                region.base(),
                region.end()
            );
            return;
        }

        state.managed.push(region);
        state.free.insert(region);
        state.total += region.size();
    }

    /// Returns the total amount of memory managed by the pool.
    pub fn total_memory(&self) -> usize {
        self.state.lock().total
    }

    /// Returns the amount of memory currently handed out.
    pub fn allocated_memory(&self) -> usize {
        self.state.lock().allocated
    }

    /// Returns the amount of memory available for allocation.
    pub fn available_memory(&self) -> usize {
        self.state.lock().free.total_size()
    }

    /// Returns the number of blocks currently handed out.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live
    }

    /// Returns the largest block a single allocation could currently obtain.
    pub fn largest_free_block(&self) -> usize {
        self.state
            .lock()
            .free
            .iter()
            .map(|r| r.size())
            .max()
            .unwrap_or(0)
    }
}

impl PhysicalAllocator for ContiguousPool {
    type Handle = PoolHandle;

    fn allocate(&self, size: NonZeroUsize) -> Result<Allocation<PoolHandle>, AllocError> {
        let rounded = size
            .get()
            .checked_next_multiple_of(PAGE_SIZE)
            .ok_or(AllocError::TooLarge)?;

        let mut state = self.state.lock();
        let Some(region) = state.free.take_first_fit(rounded) else {
            return Err(AllocError::OutOfMemory);
        };

        state.allocated += region.size();
        state.live += 1;
        state.next_serial += 1;
        let handle = PoolHandle {
            serial: state.next_serial,
            region,
            requested: size,
        };

        Ok(Allocation {
            handle,
            address: region.base(),
        })
    }

    fn free(&self, handle: PoolHandle, size: NonZeroUsize, address: PhysicalAddress) {
        let region = handle.region;
        if handle.requested != size || region.base() != address {
            log::error!(
                "pool: handle {} freed as {} at {}, allocated as {} at {}",
                handle,
                HumanSize::from(size),
                address,
                HumanSize::from(handle.requested),
                region.base()
            );
            panic!("pool handle freed with mismatched size or address");
        }

        let mut state = self.state.lock();
        if state.free.overlaps(&region) {
            log::error!(
                "pool: handle {} covers {}..{} which is already free",
                handle,
                region.base(),
                region.end()
            );
            panic!("pool range freed twice");
        }

        state.free.insert(region);
        state.allocated -= region.size();
        state.live -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1 << 20;

    fn nz(size: usize) -> NonZeroUsize {
        NonZeroUsize::new(size).unwrap()
    }

    fn pool(size: usize) -> ContiguousPool {
        ContiguousPool::new(PhysicalAddress::new(0x1_0000_0000), size)
    }

    #[test]
    fn memory_region_operations() {
        let r1 = MemoryRegion::new(PhysicalAddress::new(0x1000), 0x1000);
        let r2 = MemoryRegion::new(PhysicalAddress::new(0x2000), 0x1000);
        let r3 = MemoryRegion::new(PhysicalAddress::new(0x1800), 0x1000);

        assert_eq!(r1.end().as_usize(), 0x2000);
        assert!(!r1.overlaps(&r2));
        assert!(r1.adjacent(&r2));
        assert!(r1.overlaps(&r3));
        assert!(!r1.adjacent(&r3));
    }

    #[test]
    fn new_pool_is_page_aligned() {
        let pool = ContiguousPool::new(PhysicalAddress::new(0x0100), 0x3000);
        // 0x100..0x3100 shrinks to 0x1000..0x3000
        assert_eq!(pool.total_memory(), 0x2000);
        assert_eq!(pool.available_memory(), 0x2000);
        assert_eq!(pool.allocated_memory(), 0);
    }

    #[test]
    fn ignores_sub_page_region() {
        let pool = ContiguousPool::new(PhysicalAddress::new(0x0100), 0x0200);
        assert_eq!(pool.total_memory(), 0);
    }

    #[test]
    fn ignores_overlapping_region() {
        let mut pool = pool(4 * MIB);
        pool.add_region(PhysicalAddress::new(0x1_0000_0000 + MIB), MIB);
        assert_eq!(pool.total_memory(), 4 * MIB);
    }

    #[test]
    fn adjacent_regions_merge() {
        let mut pool = pool(MIB);
        pool.add_region(PhysicalAddress::new(0x1_0000_0000 + MIB), MIB);
        assert_eq!(pool.total_memory(), 2 * MIB);
        assert_eq!(pool.largest_free_block(), 2 * MIB);
    }

    #[test]
    fn allocates_first_fit() {
        let pool = pool(4 * MIB);

        let a = pool.allocate(nz(MIB)).unwrap();
        let b = pool.allocate(nz(MIB)).unwrap();
        assert_eq!(a.address, PhysicalAddress::new(0x1_0000_0000));
        assert_eq!(b.address, PhysicalAddress::new(0x1_0000_0000 + MIB));
        assert_eq!(pool.allocated_memory(), 2 * MIB);
        assert_eq!(pool.live_allocations(), 2);
    }

    #[test]
    fn rounds_to_pages() {
        let pool = pool(MIB);
        let a = pool.allocate(nz(1)).unwrap();
        assert_eq!(a.handle.region().size(), PAGE_SIZE);
        assert_eq!(pool.allocated_memory(), PAGE_SIZE);
        pool.free(a.handle, nz(1), a.address);
        assert_eq!(pool.allocated_memory(), 0);
    }

    #[test]
    fn free_coalesces() {
        let pool = pool(3 * MIB);

        let a = pool.allocate(nz(MIB)).unwrap();
        let b = pool.allocate(nz(MIB)).unwrap();
        let c = pool.allocate(nz(MIB)).unwrap();
        assert_eq!(pool.available_memory(), 0);

        pool.free(a.handle, nz(MIB), a.address);
        pool.free(c.handle, nz(MIB), c.address);
        assert_eq!(pool.largest_free_block(), MIB);

        pool.free(b.handle, nz(MIB), b.address);
        assert_eq!(pool.largest_free_block(), 3 * MIB);
        assert_eq!(pool.live_allocations(), 0);
    }

    #[test]
    fn out_of_memory() {
        let pool = pool(2 * MIB);
        pool.allocate(nz(2 * MIB)).unwrap();
        assert_eq!(
            pool.allocate(nz(PAGE_SIZE)).map(|a| a.address),
            Err(AllocError::OutOfMemory)
        );
    }

    #[test]
    fn fragmented_pool_cannot_fit() {
        let pool = pool(3 * MIB);
        let a = pool.allocate(nz(MIB)).unwrap();
        let _b = pool.allocate(nz(MIB)).unwrap();
        let c = pool.allocate(nz(MIB)).unwrap();
        pool.free(a.handle, nz(MIB), a.address);
        pool.free(c.handle, nz(MIB), c.address);

        assert_eq!(pool.available_memory(), 2 * MIB);
        assert!(pool.allocate(nz(2 * MIB)).is_err());
    }

    #[test]
    fn rounding_overflow_is_too_large() {
        let pool = pool(MIB);
        assert_eq!(
            pool.allocate(nz(usize::MAX)).map(|a| a.address),
            Err(AllocError::TooLarge)
        );
    }

    #[test]
    #[should_panic(expected = "mismatched size or address")]
    fn rejects_mismatched_free() {
        let pool = pool(MIB);
        let a = pool.allocate(nz(PAGE_SIZE)).unwrap();
        pool.free(a.handle, nz(2 * PAGE_SIZE), a.address);
    }

    #[test]
    fn handles_are_unique() {
        let pool = pool(MIB);
        let a = pool.allocate(nz(PAGE_SIZE)).unwrap();
        pool.free(a.handle, nz(PAGE_SIZE), a.address);
        let b = pool.allocate(nz(PAGE_SIZE)).unwrap();
        // Same address, new token.
        assert_eq!(b.address, PhysicalAddress::new(0x1_0000_0000));
        assert_eq!(format!("{}", b.handle), "#2");
    }
}
