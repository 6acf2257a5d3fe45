//! Size units and human-readable size formatting.

use core::fmt;
use core::num::NonZeroUsize;

/// Binary size units, each 1024 times the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeUnit {
    Bytes,
    KiB,
    MiB,
    GiB,
    TiB,
    PiB,
    EiB,
}

impl SizeUnit {
    const ALL: [SizeUnit; 7] = [
        SizeUnit::Bytes,
        SizeUnit::KiB,
        SizeUnit::MiB,
        SizeUnit::GiB,
        SizeUnit::TiB,
        SizeUnit::PiB,
        SizeUnit::EiB,
    ];

    /// Returns log2 of the number of bytes in one unit.
    #[inline]
    pub const fn shift(self) -> u32 {
        self as u32 * 10
    }

    /// Returns the unit suffix used when formatting.
    pub const fn suffix(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "B",
            SizeUnit::KiB => "KiB",
            SizeUnit::MiB => "MiB",
            SizeUnit::GiB => "GiB",
            SizeUnit::TiB => "TiB",
            SizeUnit::PiB => "PiB",
            SizeUnit::EiB => "EiB",
        }
    }

    /// Converts `count` units to bytes.
    ///
    /// Returns `None` when the product does not fit in a `usize` (or when the unit
    /// itself is wider than a `usize` on this target).
    ///
    /// ```
    /// use ledger::SizeUnit;
    ///
    /// assert_eq!(SizeUnit::MiB.to_bytes(2), Some(2 * 1024 * 1024));
    /// assert_eq!(SizeUnit::MiB.to_bytes(usize::MAX), None);
    /// ```
    pub const fn to_bytes(self, count: usize) -> Option<usize> {
        let shift = self.shift();
        if shift >= usize::BITS {
            return if count == 0 { Some(0) } else { None };
        }
        if count > usize::MAX >> shift {
            return None;
        }
        Some(count << shift)
    }

    /// Converts `count` units to a non-zero byte count.
    ///
    /// Zero and overflowing requests both yield `None`.
    pub const fn to_nonzero_bytes(self, count: usize) -> Option<NonZeroUsize> {
        match self.to_bytes(count) {
            Some(bytes) => NonZeroUsize::new(bytes),
            None => None,
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Wraps a size in bytes and formats it as a human-readable value with binary SI prefixes.
///
/// Values are displayed with up to 2 decimal places, omitting trailing zeros.
///
/// # Examples
///
/// ```
/// use ledger::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(0)), "0B");
/// assert_eq!(format!("{}", HumanSize(1023)), "1023B");
/// assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
/// assert_eq!(format!("{}", HumanSize(100 << 20)), "100MiB");
/// assert_eq!(format!("{}", HumanSize(1 << 30)), "1GiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanSize(pub usize);

impl HumanSize {
    /// Returns the raw byte count.
    #[inline]
    pub const fn bytes(self) -> usize {
        self.0
    }

    /// Returns the largest unit in which this size is at least one.
    pub fn unit(self) -> SizeUnit {
        let mut unit = SizeUnit::Bytes;
        for candidate in SizeUnit::ALL {
            if candidate.shift() < usize::BITS && self.0 >> candidate.shift() > 0 {
                unit = candidate;
            }
        }
        unit
    }
}

impl From<usize> for HumanSize {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<NonZeroUsize> for HumanSize {
    #[inline]
    fn from(value: NonZeroUsize) -> Self {
        Self(value.get())
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit();
        if unit == SizeUnit::Bytes {
            return write!(f, "{}B", self.0);
        }

        let whole = self.0 >> unit.shift();
        let remainder = self.0 & ((1usize << unit.shift()) - 1);
        if remainder == 0 {
            return write!(f, "{}{}", whole, unit);
        }

        let scaled = self.0 as f64 / (1u64 << unit.shift()) as f64;
        if (scaled * 10.0) as u64 as f64 == scaled * 10.0 {
            write!(f, "{:.1}{}", scaled, unit)
        } else {
            write!(f, "{:.2}{}", scaled, unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_units_to_bytes() {
        assert_eq!(SizeUnit::Bytes.to_bytes(7), Some(7));
        assert_eq!(SizeUnit::KiB.to_bytes(4), Some(4096));
        assert_eq!(SizeUnit::MiB.to_bytes(1024), Some(1 << 30));
        assert_eq!(SizeUnit::GiB.to_bytes(0), Some(0));
    }

    #[test]
    fn detects_overflow() {
        assert_eq!(SizeUnit::MiB.to_bytes(usize::MAX / (1 << 20) + 1), None);
        assert_eq!(
            SizeUnit::MiB.to_bytes(usize::MAX / (1 << 20)),
            Some((usize::MAX / (1 << 20)) << 20)
        );
        assert_eq!(SizeUnit::Bytes.to_bytes(usize::MAX), Some(usize::MAX));
    }

    #[test]
    fn nonzero_rejects_zero() {
        assert_eq!(SizeUnit::MiB.to_nonzero_bytes(0), None);
        assert_eq!(
            SizeUnit::KiB.to_nonzero_bytes(1).map(NonZeroUsize::get),
            Some(1024)
        );
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format!("{}", HumanSize(0)), "0B");
        assert_eq!(format!("{}", HumanSize(512)), "512B");
        assert_eq!(format!("{}", HumanSize(1023)), "1023B");
    }

    #[test]
    fn formats_whole_units() {
        assert_eq!(format!("{}", HumanSize(2048)), "2KiB");
        assert_eq!(format!("{}", HumanSize(16 << 20)), "16MiB");
        assert_eq!(format!("{}", HumanSize(124 << 30)), "124GiB");
        assert_eq!(format!("{}", HumanSize(1 << 40)), "1TiB");
    }

    #[test]
    fn formats_fractions() {
        assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
        assert_eq!(format!("{}", HumanSize(1_610_612_736)), "1.5GiB");
        let formatted = format!("{}", HumanSize(1025));
        assert_eq!(formatted, "1.00KiB");
    }

    #[test]
    fn picks_largest_unit() {
        assert_eq!(HumanSize(1).unit(), SizeUnit::Bytes);
        assert_eq!(HumanSize(1 << 20).unit(), SizeUnit::MiB);
        assert_eq!(HumanSize((1 << 30) - 1).unit(), SizeUnit::MiB);
    }
}
