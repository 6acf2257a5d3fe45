//! Operator-facing command layer.
//!
//! Operators size requests in a fixed unit (MiB unless configured otherwise) and use three
//! verbs: write a count to reserve that much, write zero to drop every reservation, and
//! undo to give back the next reservation in ledger order.

use crate::{HumanSize, Ledger, LedgerError, PhysicalAllocator, ReservationId, SizeUnit};

/// Result of [`HogControl::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    /// A new reservation was made.
    Reserved(ReservationId),
    /// A zero write cleared this many reservations.
    Cleared(usize),
}

pub struct HogControl<'a, A: PhysicalAllocator> {
    ledger: &'a Ledger<A>,
    unit: SizeUnit,
}

impl<'a, A: PhysicalAllocator> HogControl<'a, A> {
    /// Creates a command layer sizing requests in MiB.
    pub fn new(ledger: &'a Ledger<A>) -> Self {
        Self::with_unit(ledger, SizeUnit::MiB)
    }

    pub fn with_unit(ledger: &'a Ledger<A>, unit: SizeUnit) -> Self {
        Self { ledger, unit }
    }

    pub fn unit(&self) -> SizeUnit {
        self.unit
    }

    pub fn ledger(&self) -> &'a Ledger<A> {
        self.ledger
    }

    /// Reserves `count` units, or clears everything when `count` is zero.
    pub fn write(&self, count: usize) -> Result<Written, LedgerError> {
        if count == 0 {
            log::info!("clear requested");
            return Ok(Written::Cleared(self.ledger.release_all()));
        }

        let id = self.ledger.reserve_in(count, self.unit)?;
        Ok(Written::Reserved(id))
    }

    /// Gives back the next reservation in ledger order.
    ///
    /// Undoing with nothing reserved is harmless and yields `None`.
    pub fn undo(&self) -> Option<ReservationId> {
        match self.ledger.release_one() {
            Ok(id) => Some(id),
            Err(err) => {
                log::debug!("undo: {}", err);
                None
            }
        }
    }

    /// Releases everything still reserved, as when the operator interface goes away.
    pub fn shutdown(self) -> usize {
        let released = self.ledger.release_all();
        log::info!(
            "shutdown released {} reservations, {} still reserved",
            released,
            HumanSize(self.ledger.reserved_bytes())
        );
        released
    }
}
