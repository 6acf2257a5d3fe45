//! Concurrent reserve/undo churn against one ledger.

use std::fmt;

use rayon::prelude::*;

use ledger::{ContiguousPool, HumanSize, Ledger, LedgerError, SizeUnit};

/// What the workers managed to do.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub reserved: usize,
    pub released: usize,
    pub out_of_space: usize,
    pub reserved_bytes: usize,
}

impl Tally {
    fn merge(self, other: Tally) -> Tally {
        Tally {
            reserved: self.reserved + other.reserved,
            released: self.released + other.released,
            out_of_space: self.out_of_space + other.out_of_space,
            reserved_bytes: self.reserved_bytes + other.reserved_bytes,
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reserved ({} total), {} released, {} out of space",
            self.reserved,
            HumanSize(self.reserved_bytes),
            self.released,
            self.out_of_space
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error("failed to start workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("ledger holds {actual} reservations, expected {expected}")]
    Unbalanced { expected: usize, actual: usize },
    #[error("pool has {live} live blocks but ledger holds {len}")]
    Leaked { live: usize, len: usize },
}

/// Deterministic spread of sizes in `1..=max_size`.
fn size_for(worker: usize, round: usize, max_size: usize) -> usize {
    1 + worker.wrapping_mul(7919).wrapping_add(round.wrapping_mul(104_729)) % max_size.max(1)
}

fn churn(
    ledger: &Ledger<&ContiguousPool>,
    unit: SizeUnit,
    worker: usize,
    rounds: usize,
    max_size: usize,
) -> Tally {
    let mut tally = Tally::default();

    for round in 0..rounds {
        let count = size_for(worker, round, max_size);
        match ledger.reserve_in(count, unit) {
            Ok(_) => {
                tally.reserved += 1;
                tally.reserved_bytes += unit.to_bytes(count).unwrap_or(0);
            }
            Err(LedgerError::OutOfSpace) => tally.out_of_space += 1,
            Err(err) => log::warn!("worker {}: {}", worker, err),
        }

        // Undo about every other round so the ledger both grows and shrinks.
        if round % 2 == 1 && ledger.release_one().is_ok() {
            tally.released += 1;
        }
    }

    log::debug!("worker {} done: {}", worker, tally);
    tally
}

/// Runs `workers` threads of reserve/undo churn and checks the ledger against the pool.
pub fn stress(
    ledger: &Ledger<&ContiguousPool>,
    unit: SizeUnit,
    workers: usize,
    rounds: usize,
    max_size: usize,
) -> Result<Tally, StressError> {
    let threads = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;

    let before = ledger.len();
    let tally = threads.install(|| {
        (0..workers)
            .into_par_iter()
            .map(|worker| churn(ledger, unit, worker, rounds, max_size))
            .reduce(Tally::default, Tally::merge)
    });

    let expected = before + tally.reserved - tally.released;
    let actual = ledger.len();
    if actual != expected {
        return Err(StressError::Unbalanced { expected, actual });
    }

    let live = ledger.allocator().live_allocations();
    if live != actual {
        return Err(StressError::Leaked { live, len: actual });
    }

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::{OrderPolicy, PhysicalAddress};

    #[test]
    fn sizes_stay_in_range() {
        for worker in 0..16 {
            for round in 0..64 {
                let size = size_for(worker, round, 16);
                assert!((1..=16).contains(&size));
            }
        }
        assert_eq!(size_for(3, 5, 0), 1);
    }

    #[test]
    fn books_balance_under_churn() {
        let pool = ContiguousPool::new(PhysicalAddress::new(0x1_0000_0000), 64 << 20);

        for policy in [OrderPolicy::Lifo, OrderPolicy::Fifo] {
            let ledger = Ledger::new(&pool, policy);
            let tally = stress(&ledger, SizeUnit::MiB, 4, 200, 8).unwrap();

            assert_eq!(ledger.len(), tally.reserved - tally.released);
            assert_eq!(pool.live_allocations(), ledger.len());
            drop(ledger);
            assert_eq!(pool.live_allocations(), 0);
            assert_eq!(pool.available_memory(), pool.total_memory());
        }
    }
}
